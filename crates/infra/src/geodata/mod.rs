//! Geodata collaborators: answer "where is this location now?".
//!
//! The validation worker calls [`GeodataResolver::resolve`] once per batch.
//! A uid missing from the answer means "not resolved this time"; the caller
//! leaves the corresponding task pending.

use shopgeo_core::{LocationUid, ResolvedLocation};

pub mod overpass;
pub mod testing;

pub use overpass::{OverpassResolver, DEFAULT_OVERPASS_URL};
pub use testing::{FnResolver, StaticResolver};

/// Geodata lookup error.
#[derive(Debug, thiserror::Error)]
pub enum GeodataError {
    #[error("geodata request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed geodata response: {0}")]
    MalformedResponse(String),

    #[error("geodata lookup failed: {0}")]
    Lookup(String),
}

/// Resolves location uids to coordinates, in one request per call.
pub trait GeodataResolver: Send + Sync {
    /// Returns coordinates for the uids that could be resolved. Order is
    /// unspecified; uids without an answer are simply absent.
    fn resolve(&self, uids: &[LocationUid]) -> Result<Vec<ResolvedLocation>, GeodataError>;
}
