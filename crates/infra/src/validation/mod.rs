//! Shop coordinate validation.
//!
//! Producers (shop creation, "shop moved" reports) insert queue rows through
//! [`ShopValidationScheduler::schedule_validations`]; a single background
//! worker drains the queue in priority order, asks the geodata source for the
//! current position of each shop and writes the answers back.

pub mod reconcile;
pub mod scheduler;

pub use reconcile::enqueue_forgotten_shops;
pub use scheduler::{BatchOutcome, ShopValidationScheduler, WORKER_NAME};

pub use crate::config::SINGLE_VALIDATION_SHOPS_COUNT_MAX;

use crate::geodata::GeodataError;
use crate::store::StoreError;
use crate::workers::WorkerError;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Geodata(#[from] GeodataError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("geodata resolver can only be replaced in testing mode")]
    NotTesting,

    #[error("validation scheduler has not been started")]
    NotStarted,

    #[error("geodata source resolved none of the {selected} selected shops")]
    NoProgress { selected: usize },
}
