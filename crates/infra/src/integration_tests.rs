//! Integration tests for the full validation pipeline.
//!
//! Tests: schedule -> queue store -> background worker -> resolver -> shop store
//!
//! Verifies:
//! - Every scheduled shop converges to the coordinates the resolver reports
//! - Partially resolved batches leave the rest queued until resolved
//! - A restarted scheduler picks up rows left by the previous instance
//! - Many producer threads scheduling at once lose no wake-up and no task

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    use shopgeo_core::{
        Clock, LocationUid, ManualClock, NewShop, NewValidationTask, ShopId, SystemClock, UserId,
        ValidationReason,
    };

    use crate::config::ValidationConfig;
    use crate::geodata::StaticResolver;
    use crate::store::{InMemoryValidationStore, ShopStore, ValidationQueueStore};
    use crate::validation::ShopValidationScheduler;
    use crate::workers::WorkerConfig;

    const WAIT: Duration = Duration::from_secs(10);

    fn config(batch_max: usize) -> ValidationConfig {
        ValidationConfig::default()
            .with_batch_max(batch_max)
            .with_worker(
                WorkerConfig::default()
                    .with_backoff(vec![Duration::from_millis(1), Duration::from_millis(2)]),
            )
    }

    fn insert_validated(store: &InMemoryValidationStore, n: u64) -> (ShopId, LocationUid) {
        let uid = LocationUid::node(n.to_string()).unwrap();
        let at = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let id = store
            .insert_shop(
                NewShop::new(uid.clone(), UserId::new(), at)
                    .with_coordinates(0.0, 0.0)
                    .validated_at(at),
            )
            .unwrap();
        (id, uid)
    }

    #[test]
    fn scheduled_shops_converge_to_resolved_coordinates() {
        shopgeo_observability::tracing::init_for_tests();
        let store = InMemoryValidationStore::arc();
        let scheduler =
            ShopValidationScheduler::new(store.clone(), config(4), Arc::new(SystemClock)).unwrap();
        let resolver = Arc::new(StaticResolver::new());
        scheduler.start(resolver.clone(), false).unwrap();

        let reasons = [
            ValidationReason::ShopMoved,
            ValidationReason::CoordsWereNull,
            ValidationReason::PeriodicRevalidation,
        ];
        let mut shops = Vec::new();
        for n in 0..11u64 {
            let (id, uid) = insert_validated(&store, n);
            resolver.set_location(uid, n as f64, -(n as f64));
            shops.push(id);
        }
        let tasks: Vec<_> = shops
            .iter()
            .enumerate()
            .map(|(i, id)| {
                NewValidationTask::new(*id, UserId::new(), reasons[i % reasons.len()], Utc::now())
            })
            .collect();
        scheduler.schedule_validations(tasks).unwrap();

        assert!(scheduler.wait_until_idle(WAIT).unwrap());
        assert_eq!(store.count().unwrap(), 0);
        for (n, id) in shops.iter().enumerate() {
            let shop = store.get_shop(*id).unwrap().unwrap();
            assert_eq!(shop.coordinates(), Some((n as f64, -(n as f64))));
            assert!(shop.last_validation_time.unwrap() > Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        }
        assert!(resolver.batches().iter().all(|b| b.len() <= 4));
        scheduler.stop_and_join();
        assert!(!scheduler.is_active());
    }

    #[test]
    fn withheld_shops_stay_queued_until_resolved() {
        let store = InMemoryValidationStore::arc();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let scheduler =
            ShopValidationScheduler::new(store.clone(), config(20), clock.clone()).unwrap();
        let (known, known_uid) = insert_validated(&store, 1);
        let (late, late_uid) = insert_validated(&store, 2);
        let resolver = Arc::new(StaticResolver::new().with_location(known_uid, 1.5, 2.5));
        scheduler.start(resolver.clone(), true).unwrap();

        for id in [known, late] {
            scheduler
                .schedule_validation(id, UserId::new(), ValidationReason::ShopMoved, clock.now())
                .unwrap();
        }

        // The late shop keeps failing to resolve; wait until the known one
        // went through and at least one retry of the late one backed off.
        let deadline = std::time::Instant::now() + WAIT;
        while (store.count().unwrap() != 1 || scheduler.stats().failures == 0)
            && std::time::Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.tasks()[0].shop_id, late);
        assert_eq!(
            store.get_shop(late).unwrap().unwrap().coordinates(),
            Some((0.0, 0.0))
        );
        assert!(!clock.sleeps().is_empty());

        resolver.set_location(late_uid, 3.5, 4.5);
        assert!(scheduler.wait_until_idle(WAIT).unwrap());
        assert_eq!(
            store.get_shop(late).unwrap().unwrap().coordinates(),
            Some((3.5, 4.5))
        );
        scheduler.stop_and_join();
    }

    #[test]
    fn restarted_scheduler_drains_rows_left_behind() {
        let store = InMemoryValidationStore::arc();
        let (id, _) = insert_validated(&store, 1);
        let missing = store
            .insert_shop(NewShop::new(
                LocationUid::node("77").unwrap(),
                UserId::new(),
                Utc::now(),
            ))
            .unwrap();

        {
            let first =
                ShopValidationScheduler::new(store.clone(), config(20), Arc::new(SystemClock))
                    .unwrap();
            // Queued while nothing runs; the wake-up is skipped.
            first
                .schedule_validation(id, UserId::new(), ValidationReason::ShopMoved, Utc::now())
                .unwrap();
        }
        assert_eq!(store.count().unwrap(), 1);

        let second =
            ShopValidationScheduler::new(store.clone(), config(20), Arc::new(SystemClock)).unwrap();
        second
            .start(Arc::new(StaticResolver::everywhere(6.0, 7.0)), false)
            .unwrap();
        assert!(second.wait_until_idle(WAIT).unwrap());
        second.stop_and_join();

        assert_eq!(store.count().unwrap(), 0);
        for shop_id in [id, missing] {
            assert_eq!(
                store.get_shop(shop_id).unwrap().unwrap().coordinates(),
                Some((6.0, 7.0))
            );
        }
    }

    #[test]
    fn concurrent_producers_drain_every_task_exactly_once() {
        const PRODUCERS: usize = 8;
        const PER_PRODUCER: usize = 25;

        let store = InMemoryValidationStore::arc();
        let scheduler =
            ShopValidationScheduler::new(store.clone(), config(3), Arc::new(SystemClock)).unwrap();
        let resolver = Arc::new(StaticResolver::new());
        let shops: Vec<ShopId> = (0..(PRODUCERS * PER_PRODUCER) as u64)
            .map(|n| {
                let (id, uid) = insert_validated(&store, n);
                resolver.set_location(uid, n as f64, n as f64 / 2.0);
                id
            })
            .collect();
        scheduler.start(resolver.clone(), false).unwrap();

        std::thread::scope(|scope| {
            for chunk in shops.chunks(PER_PRODUCER) {
                let scheduler = &scheduler;
                scope.spawn(move || {
                    for id in chunk {
                        scheduler
                            .schedule_validation(
                                *id,
                                UserId::new(),
                                ValidationReason::ShopMoved,
                                Utc::now(),
                            )
                            .unwrap();
                    }
                });
            }
        });

        assert!(scheduler.wait_until_idle(WAIT).unwrap());
        scheduler.stop_and_join();

        assert_eq!(store.count().unwrap(), 0);
        for (n, id) in shops.iter().enumerate() {
            assert_eq!(
                store.get_shop(*id).unwrap().unwrap().coordinates(),
                Some((n as f64, n as f64 / 2.0))
            );
        }
        let batches = resolver.batches();
        assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 3));
        let looked_up: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(looked_up, shops.len());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn batches_drain_every_task_exactly_once(
            reasons in proptest::collection::vec(0usize..4, 1..40),
            batch_max in 1usize..8,
        ) {
            let store = InMemoryValidationStore::arc();
            let clock = Arc::new(ManualClock::new(Utc::now()));
            let scheduler =
                ShopValidationScheduler::new(store.clone(), config(batch_max), clock).unwrap();
            let resolver = Arc::new(StaticResolver::everywhere(1.0, 1.0));
            scheduler.start(resolver.clone(), false).unwrap();

            let tasks: Vec<_> = reasons
                .iter()
                .enumerate()
                .map(|(n, r)| {
                    let (id, _) = insert_validated(&store, n as u64);
                    NewValidationTask::new(id, UserId::new(), ValidationReason::ALL[*r], Utc::now())
                })
                .collect();
            scheduler.schedule_validations(tasks).unwrap();

            prop_assert!(scheduler.wait_until_idle(WAIT).unwrap());
            scheduler.stop_and_join();

            prop_assert_eq!(store.count().unwrap(), 0);
            let batches = resolver.batches();
            prop_assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= batch_max));
            let resolved: usize = batches.iter().map(Vec::len).sum();
            prop_assert_eq!(resolved, reasons.len());
        }
    }
}
