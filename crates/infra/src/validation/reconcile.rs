//! Startup reconciliation: queue shops that were never validated.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use shopgeo_core::{NewValidationTask, ValidationReason};

use crate::store::{StoreError, ValidationStore};

/// Enqueue a task for every shop with missing coordinates or no validation
/// time, and (with `revalidation_max_age`) for shops last validated before
/// `now - max_age` (no cutoff when that lies before the earliest
/// representable time). Shops that already have a pending task are skipped, so
/// running this on every start never duplicates rows.
///
/// Tasks are attributed to the shop's creator. Returns how many were queued.
pub fn enqueue_forgotten_shops(
    store: &dyn ValidationStore,
    now: DateTime<Utc>,
    revalidation_max_age: Option<Duration>,
) -> Result<usize, StoreError> {
    let stale_before = revalidation_max_age.and_then(|max_age| now.checked_sub_signed(max_age));
    let shops = store.select_shops_needing_validation(true, stale_before)?;
    if shops.is_empty() {
        return Ok(0);
    }

    let tasks: Vec<NewValidationTask> = shops
        .iter()
        .map(|shop| {
            let reason = shop
                .missing_validation_reason()
                .unwrap_or(ValidationReason::PeriodicRevalidation);
            if reason != ValidationReason::PeriodicRevalidation {
                warn!(shop_id = %shop.id, uid = %shop.location_uid, %reason, "forgotten shop found");
            }
            NewValidationTask::new(shop.id, shop.creator, reason, now)
        })
        .collect();

    let count = store.insert_batch(tasks)?.len();
    info!(count, "queued shops for validation at startup");
    Ok(count)
}
