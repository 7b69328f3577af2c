//! Domain error model.

use thiserror::Error;

/// Domain-level error.
///
/// Keep this focused on deterministic failures of domain values (parsing,
/// unknown codes). Store, network and worker failures have their own types in
/// `shopgeo-infra`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A persistent code did not map to any known variant.
    #[error("unknown {kind} code: {code}")]
    UnknownCode { kind: &'static str, code: i16 },
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn unknown_code(kind: &'static str, code: i16) -> Self {
        Self::UnknownCode { kind, code }
    }
}
