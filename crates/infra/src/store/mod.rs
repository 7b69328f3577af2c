//! Durable state owned by the validation subsystem.
//!
//! Two tables: shops (coordinates + last validation time) and the queue of
//! pending validation tasks. Request handlers only insert queue rows; the
//! validation worker is the single writer of shop coordinates and the only
//! one deleting queue rows.

use chrono::{DateTime, Utc};

use shopgeo_core::{
    AppliedValidation, NewShop, NewValidationTask, QueuedValidation, Shop, ShopId, TaskId,
    ValidationReason,
};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryValidationStore;
pub use postgres::PostgresValidationStore;

/// Store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("shop not found: {0}")]
    ShopNotFound(ShopId),
    #[error("validation task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Shop table access.
pub trait ShopStore: Send + Sync {
    fn insert_shop(&self, shop: NewShop) -> Result<ShopId, StoreError>;

    fn get_shop(&self, id: ShopId) -> Result<Option<Shop>, StoreError>;

    /// Shops with a missing coordinate or no validation time, plus (when
    /// `stale_before` is set) shops last validated before that instant.
    /// With `exclude_already_queued`, shops that have any pending task are
    /// left out. Ordered by id.
    fn select_shops_needing_validation(
        &self,
        exclude_already_queued: bool,
        stale_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Shop>, StoreError>;

    fn update_coordinates(
        &self,
        shop_id: ShopId,
        lat: f64,
        lon: f64,
        validated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Validation queue table access.
pub trait ValidationQueueStore: Send + Sync {
    fn insert(&self, task: NewValidationTask) -> Result<TaskId, StoreError>;

    /// Up to `limit` tasks with `reason`, oldest enqueued first (ties by id),
    /// each joined with its shop.
    fn select_by_reason(
        &self,
        reason: ValidationReason,
        limit: usize,
    ) -> Result<Vec<QueuedValidation>, StoreError>;

    fn delete_by_id(&self, task_id: TaskId) -> Result<(), StoreError>;

    /// Cheap existence probe. Only tasks `select_by_reason` can return for
    /// some known reason count; rows with unknown reason codes are ignored.
    fn exists_any(&self) -> Result<bool, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;
}

/// Both tables, with the multi-row operations that must be atomic.
pub trait ValidationStore: ShopStore + ValidationQueueStore {
    /// Insert all tasks or none.
    fn insert_batch(&self, tasks: Vec<NewValidationTask>) -> Result<Vec<TaskId>, StoreError>;

    /// In one transaction: write each shop's coordinates and validation time,
    /// then delete the task row. Already-deleted task rows are ignored.
    fn apply_batch(&self, applied: &[AppliedValidation]) -> Result<(), StoreError>;
}
