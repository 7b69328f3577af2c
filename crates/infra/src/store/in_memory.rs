//! In-memory validation store for tests/dev.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use shopgeo_core::{
    AppliedValidation, NewShop, NewValidationTask, QueuedValidation, Shop, ShopId, TaskId,
    ValidationReason, ValidationTask,
};

use super::{ShopStore, StoreError, ValidationQueueStore, ValidationStore};

#[derive(Debug, Default)]
struct Tables {
    shops: BTreeMap<ShopId, Shop>,
    queue: BTreeMap<TaskId, ValidationTask>,
    last_shop_id: i64,
    last_task_id: i64,
}

impl Tables {
    fn insert_task(&mut self, task: NewValidationTask) -> Result<TaskId, StoreError> {
        if !self.shops.contains_key(&task.shop_id) {
            return Err(StoreError::ShopNotFound(task.shop_id));
        }
        self.last_task_id += 1;
        let id = TaskId::new(self.last_task_id);
        self.queue.insert(id, ValidationTask::from_new(id, task));
        Ok(id)
    }

    fn is_queued(&self, shop_id: ShopId) -> bool {
        self.queue.values().any(|t| t.shop_id == shop_id)
    }
}

/// `RwLock`-backed store with the same semantics as the Postgres one.
#[derive(Debug, Default)]
pub struct InMemoryValidationStore {
    inner: RwLock<Tables>,
}

impl InMemoryValidationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Snapshot of all pending tasks in id order.
    pub fn tasks(&self) -> Vec<ValidationTask> {
        self.read().queue.values().cloned().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ShopStore for InMemoryValidationStore {
    fn insert_shop(&self, shop: NewShop) -> Result<ShopId, StoreError> {
        let mut tables = self.write();
        if tables
            .shops
            .values()
            .any(|s| s.location_uid == shop.location_uid)
        {
            return Err(StoreError::Storage(format!(
                "duplicate location uid {}",
                shop.location_uid
            )));
        }
        tables.last_shop_id += 1;
        let id = ShopId::new(tables.last_shop_id);
        tables.shops.insert(
            id,
            Shop {
                id,
                location_uid: shop.location_uid,
                lat: shop.lat,
                lon: shop.lon,
                last_validation_time: shop.last_validation_time,
                creator: shop.creator,
            },
        );
        Ok(id)
    }

    fn get_shop(&self, id: ShopId) -> Result<Option<Shop>, StoreError> {
        Ok(self.read().shops.get(&id).cloned())
    }

    fn select_shops_needing_validation(
        &self,
        exclude_already_queued: bool,
        stale_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Shop>, StoreError> {
        let tables = self.read();
        Ok(tables
            .shops
            .values()
            .filter(|shop| {
                shop.missing_validation_reason().is_some()
                    || stale_before.is_some_and(|cutoff| shop.validated_before(cutoff))
            })
            .filter(|shop| !exclude_already_queued || !tables.is_queued(shop.id))
            .cloned()
            .collect())
    }

    fn update_coordinates(
        &self,
        shop_id: ShopId,
        lat: f64,
        lon: f64,
        validated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.write();
        let shop = tables
            .shops
            .get_mut(&shop_id)
            .ok_or(StoreError::ShopNotFound(shop_id))?;
        shop.lat = Some(lat);
        shop.lon = Some(lon);
        shop.last_validation_time = Some(validated_at);
        Ok(())
    }
}

impl ValidationQueueStore for InMemoryValidationStore {
    fn insert(&self, task: NewValidationTask) -> Result<TaskId, StoreError> {
        self.write().insert_task(task)
    }

    fn select_by_reason(
        &self,
        reason: ValidationReason,
        limit: usize,
    ) -> Result<Vec<QueuedValidation>, StoreError> {
        let tables = self.read();
        let mut tasks: Vec<_> = tables
            .queue
            .values()
            .filter(|t| t.reason == reason)
            .collect();
        // Sort by enqueue time to ensure FIFO within a reason
        tasks.sort_by_key(|t| (t.enqueued_at, t.id));

        tasks
            .into_iter()
            .take(limit)
            .map(|task| {
                let shop = tables
                    .shops
                    .get(&task.shop_id)
                    .ok_or(StoreError::ShopNotFound(task.shop_id))?;
                Ok(QueuedValidation {
                    task: task.clone(),
                    shop: shop.clone(),
                })
            })
            .collect()
    }

    fn delete_by_id(&self, task_id: TaskId) -> Result<(), StoreError> {
        self.write()
            .queue
            .remove(&task_id)
            .map(|_| ())
            .ok_or(StoreError::TaskNotFound(task_id))
    }

    fn exists_any(&self) -> Result<bool, StoreError> {
        Ok(!self.read().queue.is_empty())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.read().queue.len())
    }
}

impl ValidationStore for InMemoryValidationStore {
    fn insert_batch(&self, tasks: Vec<NewValidationTask>) -> Result<Vec<TaskId>, StoreError> {
        let mut tables = self.write();
        if let Some(missing) = tasks.iter().find(|t| !tables.shops.contains_key(&t.shop_id)) {
            return Err(StoreError::ShopNotFound(missing.shop_id));
        }
        tasks.into_iter().map(|t| tables.insert_task(t)).collect()
    }

    fn apply_batch(&self, applied: &[AppliedValidation]) -> Result<(), StoreError> {
        let mut tables = self.write();
        if let Some(missing) = applied.iter().find(|a| !tables.shops.contains_key(&a.shop_id)) {
            return Err(StoreError::ShopNotFound(missing.shop_id));
        }
        for a in applied {
            if let Some(shop) = tables.shops.get_mut(&a.shop_id) {
                shop.lat = Some(a.coordinates.lat);
                shop.lon = Some(a.coordinates.lon);
                shop.last_validation_time = Some(a.validated_at);
            }
            tables.queue.remove(&a.task_id);
        }
        Ok(())
    }
}
