//! Time source abstraction.
//!
//! Everything that stamps rows (`enqueued_at`, `last_validation_time`) or
//! sleeps (worker backoff) goes through a [`Clock`], so tests can pin time and
//! observe sleeps without waiting for them.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Supplies the current time and blocking sleeps.
pub trait Clock: Send + Sync + core::fmt::Debug {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);

    /// Sleep for `duration`, letting `wait` do the blocking so the caller can
    /// cut it short. Clocks that fake time skip `wait` and account for the
    /// whole duration at once.
    fn sleep_with(&self, duration: Duration, wait: &dyn Fn(Duration)) {
        wait(duration);
    }
}

/// Real clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Deterministic clock for tests.
///
/// `sleep` returns immediately: it advances the clock by the requested
/// duration and records it, in call order.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Set the current time.
    pub fn set(&self, now: DateTime<Utc>) {
        *lock(&self.now) = now;
    }

    /// Move the clock forward without recording a sleep. Saturates at the
    /// largest representable time.
    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        let current = *now;
        *now = chrono::Duration::from_std(by)
            .ok()
            .and_then(|by| current.checked_add_signed(by))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    /// All sleeps requested so far, oldest first.
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }

    fn sleep(&self, duration: Duration) {
        lock(&self.sleeps).push(duration);
        self.advance(duration);
        std::thread::yield_now();
    }

    fn sleep_with(&self, duration: Duration, _wait: &dyn Fn(Duration)) {
        self.sleep(duration);
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_records_sleeps_and_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.sleep(Duration::from_secs(60));
        clock.sleep(Duration::from_secs(120));

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(60), Duration::from_secs(120)]
        );
        assert_eq!(clock.now(), start + chrono::Duration::seconds(180));

        clock.advance(Duration::from_secs(20));
        assert_eq!(clock.sleeps().len(), 2);
        assert_eq!(clock.now(), start + chrono::Duration::seconds(200));
    }

    #[test]
    fn manual_clock_records_interruptible_sleeps_whole() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let waited = Mutex::new(Vec::new());

        clock.sleep_with(Duration::from_secs(90), &|d| lock(&waited).push(d));

        assert_eq!(clock.sleeps(), vec![Duration::from_secs(90)]);
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
        assert!(lock(&waited).is_empty());
    }

    #[test]
    fn system_clock_blocks_through_the_waiter() {
        let waited = Mutex::new(Vec::new());
        SystemClock.sleep_with(Duration::from_secs(5), &|d| lock(&waited).push(d));
        assert_eq!(*lock(&waited), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn advancing_past_the_end_of_time_saturates() {
        let clock = ManualClock::new(DateTime::<Utc>::MAX_UTC - chrono::Duration::seconds(1));
        clock.advance(Duration::from_secs(60));
        assert_eq!(clock.now(), DateTime::<Utc>::MAX_UTC);

        clock.advance(Duration::MAX);
        assert_eq!(clock.now(), DateTime::<Utc>::MAX_UTC);
    }
}
