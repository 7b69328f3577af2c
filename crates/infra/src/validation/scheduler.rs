//! Validation scheduler: the shop-specific side of the background worker.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use shopgeo_core::{
    AppliedValidation, Clock, Coordinates, LocationUid, NewValidationTask, QueuedValidation,
    ShopId, TaskId, UserId, ValidationReason,
};

use crate::config::ValidationConfig;
use crate::geodata::GeodataResolver;
use crate::store::ValidationStore;
use crate::workers::{BackgroundWorker, Work, WorkerState, WorkerStats};

use super::reconcile::enqueue_forgotten_shops;
use super::ValidationError;

pub const WORKER_NAME: &str = "shops-validation-worker";

/// What one batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatchOutcome {
    /// Tasks pulled from the queue.
    pub selected: usize,
    /// Tasks whose shop was resolved, applied and removed from the queue.
    pub resolved: usize,
}

/// Batch logic run on the worker thread.
struct ValidationCore {
    store: Arc<dyn ValidationStore>,
    resolver: RwLock<Option<Arc<dyn GeodataResolver>>>,
    clock: Arc<dyn Clock>,
    batch_max: usize,
    revalidation_max_age: Option<chrono::Duration>,
    testing: AtomicBool,
}

impl ValidationCore {
    fn resolver(&self) -> Result<Arc<dyn GeodataResolver>, ValidationError> {
        self.resolver
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(ValidationError::NotStarted)
    }

    fn set_resolver(&self, resolver: Arc<dyn GeodataResolver>) {
        *self.resolver.write().unwrap_or_else(|p| p.into_inner()) = Some(resolver);
    }

    /// Up to `batch_max` tasks, highest-priority reason first, oldest first
    /// within a reason. Lower reasons are only consulted while there is room.
    fn select_tasks(&self) -> Result<Vec<QueuedValidation>, ValidationError> {
        let mut selected = Vec::with_capacity(self.batch_max);
        for reason in ValidationReason::by_priority() {
            let room = self.batch_max - selected.len();
            if room == 0 {
                break;
            }
            selected.extend(self.store.select_by_reason(reason, room)?);
        }
        Ok(selected)
    }

    fn process_batch(&self) -> Result<BatchOutcome, ValidationError> {
        let resolver = self.resolver()?;
        let tasks = self.select_tasks()?;
        if tasks.is_empty() {
            debug!("validation queue is empty");
            return Ok(BatchOutcome::default());
        }

        let mut seen = HashSet::new();
        let uids: Vec<LocationUid> = tasks
            .iter()
            .map(|q| &q.shop.location_uid)
            .filter(|uid| seen.insert(*uid))
            .cloned()
            .collect();
        info!(tasks = tasks.len(), shops = uids.len(), "validating shops");

        let resolved: HashMap<LocationUid, Coordinates> = resolver
            .resolve(&uids)?
            .into_iter()
            .map(|r| (r.uid.clone(), r.coordinates()))
            .collect();

        let now = self.clock.now();
        let applied: Vec<AppliedValidation> = tasks
            .iter()
            .filter_map(|q| {
                let coordinates = resolved.get(&q.shop.location_uid).copied();
                if coordinates.is_none() {
                    debug!(
                        task_id = %q.task.id,
                        shop_id = %q.shop.id,
                        uid = %q.shop.location_uid,
                        "shop not resolved; task stays queued"
                    );
                }
                coordinates.map(|coordinates| AppliedValidation {
                    task_id: q.task.id,
                    shop_id: q.shop.id,
                    coordinates,
                    validated_at: now,
                })
            })
            .collect();

        if applied.is_empty() {
            warn!(selected = tasks.len(), "geodata source resolved nothing");
            return Err(ValidationError::NoProgress {
                selected: tasks.len(),
            });
        }

        self.store.apply_batch(&applied)?;
        let outcome = BatchOutcome {
            selected: tasks.len(),
            resolved: applied.len(),
        };
        info!(selected = outcome.selected, resolved = outcome.resolved, "validation batch applied");
        Ok(outcome)
    }
}

impl Work for ValidationCore {
    type Error = ValidationError;

    fn has_work(&self) -> Result<bool, ValidationError> {
        Ok(self.store.exists_any()?)
    }

    fn do_work(&self) -> Result<(), ValidationError> {
        self.process_batch().map(|_| ())
    }
}

/// Keeps shop coordinates in sync with the geodata source.
///
/// One instance per process, owned by whatever owns the server lifecycle.
pub struct ShopValidationScheduler {
    core: Arc<ValidationCore>,
    worker: BackgroundWorker,
}

impl core::fmt::Debug for ShopValidationScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShopValidationScheduler")
            .field("worker", &self.worker)
            .field("batch_max", &self.core.batch_max)
            .finish_non_exhaustive()
    }
}

impl ShopValidationScheduler {
    pub fn new(
        store: Arc<dyn ValidationStore>,
        config: ValidationConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ValidationError> {
        let worker = BackgroundWorker::new(WORKER_NAME, config.worker.clone(), clock.clone())?;
        let core = Arc::new(ValidationCore {
            store,
            resolver: RwLock::new(None),
            clock,
            batch_max: config.batch_max.max(1),
            revalidation_max_age: config.revalidation_max_age,
            testing: AtomicBool::new(config.testing),
        });
        Ok(Self { core, worker })
    }

    /// Queue forgotten shops, then launch the worker.
    ///
    /// The worker's start is claimed first, so a rejected or racing `start`
    /// never touches the store. If reconciliation fails the scheduler stays
    /// `NotStarted` and may be started again.
    ///
    /// `testing` allows [`replace_resolver`](Self::replace_resolver) later on.
    pub fn start(
        &self,
        resolver: Arc<dyn GeodataResolver>,
        testing: bool,
    ) -> Result<(), ValidationError> {
        let reservation = self.worker.reserve_start()?;

        self.core.set_resolver(resolver);
        self.core.testing.fetch_or(testing, Ordering::SeqCst);

        enqueue_forgotten_shops(
            &*self.core.store,
            self.core.clock.now(),
            self.core.revalidation_max_age,
        )?;
        reservation.launch(self.core.clone())?;
        info!(batch_max = self.core.batch_max, testing, "shop validation started");
        Ok(())
    }

    /// Swap the geodata source of a running scheduler. Testing mode only.
    pub fn replace_resolver(&self, resolver: Arc<dyn GeodataResolver>) -> Result<(), ValidationError> {
        if !self.core.testing.load(Ordering::SeqCst) {
            return Err(ValidationError::NotTesting);
        }
        self.core.set_resolver(resolver);
        Ok(())
    }

    pub fn schedule_validation(
        &self,
        shop_id: ShopId,
        source: UserId,
        reason: ValidationReason,
        now: DateTime<Utc>,
    ) -> Result<TaskId, ValidationError> {
        let ids = self.schedule_validations(vec![NewValidationTask::new(shop_id, source, reason, now)])?;
        ids.into_iter().next().ok_or(ValidationError::Store(
            crate::store::StoreError::Storage("no task id returned".to_string()),
        ))
    }

    /// Insert all tasks atomically, then wake the worker.
    ///
    /// The wake-up happens after the insert has committed, so the worker can
    /// never check the queue between the two and sleep through the new rows.
    pub fn schedule_validations(
        &self,
        tasks: Vec<NewValidationTask>,
    ) -> Result<Vec<TaskId>, ValidationError> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        let ids = self.core.store.insert_batch(tasks)?;
        debug!(count = ids.len(), "validation tasks queued");
        if let Err(err) = self.worker.wake_up() {
            debug!(error = %err, "validation worker not running; tasks wait for the next start");
        }
        Ok(ids)
    }

    /// Run one batch on the calling thread.
    pub fn process_batch(&self) -> Result<BatchOutcome, ValidationError> {
        self.core.process_batch()
    }

    pub fn batch_limit(&self) -> usize {
        self.core.batch_max
    }

    pub fn stop(&self) {
        self.worker.stop();
    }

    pub fn stop_and_join(&self) {
        self.worker.stop_and_join();
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_active()
    }

    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    pub fn stats(&self) -> WorkerStats {
        self.worker.stats()
    }

    pub fn run_when_idle<F>(&self, callback: F) -> Result<(), ValidationError>
    where
        F: FnOnce() + Send + 'static,
    {
        Ok(self.worker.run_when_idle(callback)?)
    }

    /// Block until the queue has been observed empty, or `timeout` elapses.
    pub fn wait_until_idle(&self, timeout: Duration) -> Result<bool, ValidationError> {
        Ok(self.worker.wait_until_idle(timeout)?)
    }
}
