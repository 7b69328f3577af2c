//! Generic background worker: one thread, wake-ups, idle callbacks, backoff.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use shopgeo_core::Clock;

use super::backoff::BackoffPolicy;
use super::WorkerError;

/// Unit of work driven by a [`BackgroundWorker`].
///
/// Both hooks run on the worker thread only.
pub trait Work: Send + Sync + 'static {
    type Error: core::fmt::Display + core::fmt::Debug;

    /// Cheap check whether `do_work` has anything to do.
    fn has_work(&self) -> Result<bool, Self::Error>;

    /// Process one batch. Must be a no-op when there is no work.
    fn do_work(&self) -> Result<(), Self::Error>;
}

/// Callback run on the worker thread the next time it observes no work.
type IdleCallback = Box<dyn FnOnce() + Send + 'static>;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Delays applied after consecutive failures (must not be empty).
    pub backoff_delays: Vec<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            backoff_delays: vec![
                Duration::from_secs(60),
                Duration::from_secs(120),
                Duration::from_secs(240),
                Duration::from_secs(600),
            ],
        }
    }
}

impl WorkerConfig {
    pub fn with_backoff(mut self, delays: Vec<Duration>) -> Self {
        self.backoff_delays = delays;
        self
    }
}

/// Lifecycle of a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    NotStarted,
    Running,
    Stopped,
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub iterations: u64,
    pub succeeded: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_backoff: Option<Duration>,
}

struct LoopState {
    lifecycle: WorkerState,
    wake_pending: bool,
    idle_callbacks: Vec<IdleCallback>,
}

impl LoopState {
    fn new() -> Self {
        Self {
            lifecycle: WorkerState::NotStarted,
            wake_pending: false,
            idle_callbacks: Vec::new(),
        }
    }

    fn stop_requested(&self) -> bool {
        self.lifecycle == WorkerState::Stopped
    }

    fn should_sleep(&self) -> bool {
        !self.wake_pending && self.idle_callbacks.is_empty() && !self.stop_requested()
    }
}

struct Shared {
    name: String,
    state: Mutex<LoopState>,
    signal: Condvar,
    active: AtomicBool,
    stats: Mutex<WorkerStats>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stats(&self) -> MutexGuard<'_, WorkerStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stop_requested(&self) -> bool {
        self.lock().stop_requested()
    }
}

/// A domain-agnostic single-threaded work loop.
///
/// All state transitions go through one mutex/condition-variable pair, so a
/// caller never observes a half-applied transition.
pub struct BackgroundWorker {
    shared: Arc<Shared>,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl core::fmt::Debug for BackgroundWorker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BackgroundWorker")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("active", &self.is_active())
            .finish()
    }
}

impl BackgroundWorker {
    pub fn new(
        name: impl Into<String>,
        config: WorkerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, WorkerError> {
        let backoff = BackoffPolicy::new(config.backoff_delays.clone())?;
        Ok(Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(LoopState::new()),
                signal: Condvar::new(),
                active: AtomicBool::new(false),
                stats: Mutex::new(WorkerStats::default()),
            }),
            backoff,
            clock,
            join: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Launch the worker thread. Starting twice (or after `stop`) is an error.
    pub fn start<W: Work>(&self, work: Arc<W>) -> Result<(), WorkerError> {
        self.reserve_start()?.launch(work)
    }

    /// Claim the `NotStarted -> Running` transition without spawning the
    /// thread yet, so start-up steps run at most once across racing callers.
    ///
    /// Wake-ups and idle callbacks registered while the reservation is held
    /// are kept for the loop. Dropping the reservation unlaunched returns the
    /// worker to `NotStarted` and discards them.
    pub fn reserve_start(&self) -> Result<StartReservation<'_>, WorkerError> {
        let mut state = self.shared.lock();
        match state.lifecycle {
            WorkerState::NotStarted => state.lifecycle = WorkerState::Running,
            WorkerState::Running => return Err(WorkerError::AlreadyStarted),
            WorkerState::Stopped => return Err(WorkerError::Stopped),
        }
        Ok(StartReservation {
            worker: self,
            launched: false,
        })
    }

    fn spawn_loop<W: Work>(&self, work: Arc<W>) -> Result<(), WorkerError> {
        let shared = self.shared.clone();
        let clock = self.clock.clone();
        let backoff = self.backoff.clone();

        let spawned = thread::Builder::new()
            .name(self.shared.name.clone())
            .spawn(move || worker_loop(shared, work, clock, backoff));

        match spawned {
            Ok(join) => {
                *self.join.lock().unwrap_or_else(|p| p.into_inner()) = Some(join);
                Ok(())
            }
            Err(err) => {
                self.shared.lock().lifecycle = WorkerState::Stopped;
                Err(WorkerError::Spawn(err))
            }
        }
    }

    /// Ask the loop to exit after its current iteration. Does not interrupt
    /// in-flight work. Idempotent; also makes a never-started worker terminal.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        state.lifecycle = WorkerState::Stopped;
        self.shared.signal.notify_all();
    }

    /// `stop()` and wait for the worker thread to exit.
    pub fn stop_and_join(&self) {
        self.stop();
        let join = self.join.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(join) = join {
            if join.join().is_err() {
                warn!(worker = %self.shared.name, "worker thread panicked");
            }
        }
    }

    /// True only while the loop thread is running.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> WorkerState {
        self.shared.lock().lifecycle
    }

    pub fn stats(&self) -> WorkerStats {
        self.shared.stats().clone()
    }

    /// Signal that new work may be available. Safe from any thread.
    pub fn wake_up(&self) -> Result<(), WorkerError> {
        let mut state = self.shared.lock();
        ensure_running(&state)?;
        state.wake_pending = true;
        self.shared.signal.notify_one();
        Ok(())
    }

    /// Run `callback` on the worker thread the next time it observes no work.
    pub fn run_when_idle<F>(&self, callback: F) -> Result<(), WorkerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.lock();
        ensure_running(&state)?;
        state.idle_callbacks.push(Box::new(callback));
        // If there is truly no work the callback runs almost immediately.
        state.wake_pending = true;
        self.shared.signal.notify_one();
        Ok(())
    }

    /// Block until the worker has observed an empty queue, or `timeout`
    /// elapses. Returns whether idleness was observed.
    pub fn wait_until_idle(&self, timeout: Duration) -> Result<bool, WorkerError> {
        let (tx, rx) = mpsc::channel::<()>();
        self.run_when_idle(move || {
            let _ = tx.send(());
        })?;
        Ok(rx.recv_timeout(timeout).is_ok())
    }
}

/// A claimed but not yet launched start. See [`BackgroundWorker::reserve_start`].
#[must_use = "dropping the reservation cancels the start"]
pub struct StartReservation<'a> {
    worker: &'a BackgroundWorker,
    launched: bool,
}

impl StartReservation<'_> {
    /// Spawn the loop thread. Fails with `Stopped` if `stop()` ran while the
    /// reservation was held.
    pub fn launch<W: Work>(mut self, work: Arc<W>) -> Result<(), WorkerError> {
        self.launched = true;
        if self.worker.shared.stop_requested() {
            return Err(WorkerError::Stopped);
        }
        self.worker.spawn_loop(work)
    }
}

impl Drop for StartReservation<'_> {
    fn drop(&mut self) {
        if self.launched {
            return;
        }
        let mut state = self.worker.shared.lock();
        if state.lifecycle == WorkerState::Running {
            state.lifecycle = WorkerState::NotStarted;
        }
        state.wake_pending = false;
        state.idle_callbacks.clear();
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ensure_running(state: &LoopState) -> Result<(), WorkerError> {
    match state.lifecycle {
        WorkerState::Running => Ok(()),
        WorkerState::NotStarted => Err(WorkerError::NotStarted),
        WorkerState::Stopped => Err(WorkerError::Stopped),
    }
}

enum Next {
    Continue,
    Exit,
}

fn worker_loop<W: Work>(
    shared: Arc<Shared>,
    work: Arc<W>,
    clock: Arc<dyn Clock>,
    mut backoff: BackoffPolicy,
) {
    shared.active.store(true, Ordering::SeqCst);
    info!(worker = %shared.name, "background worker started");

    loop {
        let result = guarded(|| work.do_work()).and_then(|()| {
            backoff.reset();
            record_success(&shared);
            if shared.stop_requested() {
                return Ok(Next::Exit);
            }
            wait_for_work(&shared, &*work)
        });

        match result {
            Ok(Next::Continue) => {}
            Ok(Next::Exit) => break,
            Err(failure) => {
                let delay = backoff.next_delay();
                record_failure(&shared, delay);
                error!(
                    worker = %shared.name,
                    error = %failure,
                    backoff_ms = delay.as_millis() as u64,
                    "work failed; backing off"
                );
                pause(&shared, &*clock, delay);
                if shared.stop_requested() {
                    break;
                }
            }
        }
    }

    shared.active.store(false, Ordering::SeqCst);
    info!(worker = %shared.name, "background worker stopped");
}

/// Idle handling: flush callbacks, re-check, then block until woken.
fn wait_for_work<W: Work>(shared: &Shared, work: &W) -> Result<Next, String> {
    // Wake-ups that arrive from here on are kept, so work committed after the
    // checks below is never slept through.
    shared.lock().wake_pending = false;

    if guarded(|| work.has_work())? {
        return Ok(Next::Continue);
    }

    let callbacks = std::mem::take(&mut shared.lock().idle_callbacks);
    run_idle_callbacks(&shared.name, callbacks);

    if guarded(|| work.has_work())? {
        return Ok(Next::Continue);
    }

    let mut state = shared.lock();
    if state.should_sleep() {
        debug!(worker = %shared.name, "waiting for new work");
        state = shared
            .signal
            .wait_while(state, |s| s.should_sleep())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
    }

    if state.stop_requested() {
        Ok(Next::Exit)
    } else {
        Ok(Next::Continue)
    }
}

fn run_idle_callbacks(name: &str, callbacks: Vec<IdleCallback>) {
    for callback in callbacks {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
            error!(worker = %name, panic = %panic_message(&payload), "idle callback panicked");
        }
    }
}

/// Sleep `delay` through the clock as one sleep, giving up early on `stop()`.
fn pause(shared: &Shared, clock: &dyn Clock, delay: Duration) {
    if shared.stop_requested() {
        return;
    }
    clock.sleep_with(delay, &|timeout| {
        let state = shared.lock();
        let _ = shared
            .signal
            .wait_timeout_while(state, timeout, |s| !s.stop_requested())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
    });
}

/// Runs a hook, turning both errors and panics into a failure message.
fn guarded<T, E, F>(f: F) -> Result<T, String>
where
    E: core::fmt::Display,
    F: FnOnce() -> Result<T, E>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(&payload))),
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn record_success(shared: &Shared) {
    let mut stats = shared.stats();
    stats.iterations += 1;
    stats.succeeded += 1;
    stats.consecutive_failures = 0;
}

fn record_failure(shared: &Shared, delay: Duration) {
    let mut stats = shared.stats();
    stats.iterations += 1;
    stats.failures += 1;
    stats.consecutive_failures = stats.consecutive_failures.saturating_add(1);
    stats.last_backoff = Some(delay);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use chrono::Utc;
    use shopgeo_core::{ManualClock, SystemClock};

    const WAIT: Duration = Duration::from_secs(5);

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(ms(5));
        }
        check()
    }

    fn worker(name: &str, delays: Vec<Duration>, clock: Arc<dyn Clock>) -> BackgroundWorker {
        let config = WorkerConfig::default().with_backoff(delays);
        BackgroundWorker::new(name, config, clock).unwrap()
    }

    /// Pending counter drained one unit per `do_work`.
    #[derive(Default)]
    struct CountdownWork {
        pending: AtomicUsize,
        processed: AtomicUsize,
    }

    impl Work for CountdownWork {
        type Error = String;

        fn has_work(&self) -> Result<bool, String> {
            Ok(self.pending.load(Ordering::SeqCst) > 0)
        }

        fn do_work(&self) -> Result<(), String> {
            let took = self
                .pending
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| p.checked_sub(1));
            if took.is_ok() {
                self.processed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    /// Fails `failures_left` times, then succeeds.
    #[derive(Default)]
    struct FlakyWork {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
        broken_has_work: AtomicBool,
    }

    impl Work for FlakyWork {
        type Error = String;

        fn has_work(&self) -> Result<bool, String> {
            if self.broken_has_work.swap(false, Ordering::SeqCst) {
                return Err("store unavailable".to_string());
            }
            Ok(false)
        }

        fn do_work(&self) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| f.checked_sub(1));
            match failed {
                Ok(_) => Err("geodata service unreachable".to_string()),
                Err(_) => Ok(()),
            }
        }
    }

    #[test]
    fn lifecycle_misuse_is_rejected() {
        let w = worker("misuse", vec![ms(1)], Arc::new(SystemClock));
        assert!(matches!(w.wake_up(), Err(WorkerError::NotStarted)));
        assert!(matches!(w.run_when_idle(|| {}), Err(WorkerError::NotStarted)));
        assert_eq!(w.state(), WorkerState::NotStarted);

        let work = Arc::new(CountdownWork::default());
        w.start(work.clone()).unwrap();
        assert!(matches!(w.start(work.clone()), Err(WorkerError::AlreadyStarted)));

        w.stop_and_join();
        assert_eq!(w.state(), WorkerState::Stopped);
        assert!(matches!(w.start(work), Err(WorkerError::Stopped)));
        assert!(matches!(w.wake_up(), Err(WorkerError::Stopped)));
    }

    #[test]
    fn empty_backoff_list_is_rejected() {
        let config = WorkerConfig::default().with_backoff(Vec::new());
        assert!(matches!(
            BackgroundWorker::new("empty", config, Arc::new(SystemClock)),
            Err(WorkerError::EmptyBackoff)
        ));
    }

    #[test]
    fn is_active_tracks_the_loop_thread() {
        let w = worker("active", vec![ms(1)], Arc::new(SystemClock));
        assert!(!w.is_active());
        w.start(Arc::new(CountdownWork::default())).unwrap();
        assert!(eventually(WAIT, || w.is_active()));

        w.stop();
        assert!(eventually(WAIT, || !w.is_active()));
    }

    #[test]
    fn wake_up_drains_new_work() {
        let w = worker("wake", vec![ms(1)], Arc::new(SystemClock));
        let work = Arc::new(CountdownWork::default());
        w.start(work.clone()).unwrap();
        assert!(w.wait_until_idle(WAIT).unwrap());

        work.pending.store(7, Ordering::SeqCst);
        w.wake_up().unwrap();
        assert!(w.wait_until_idle(WAIT).unwrap());
        assert_eq!(work.processed.load(Ordering::SeqCst), 7);
        w.stop_and_join();
    }

    #[test]
    fn idle_callbacks_wait_for_the_queue_to_drain() {
        let w = worker("deferred", vec![ms(1)], Arc::new(SystemClock));
        let work = Arc::new(CountdownWork::default());
        work.pending.store(50, Ordering::SeqCst);

        w.start(work.clone()).unwrap();
        let seen_pending = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let work = work.clone();
            let seen_pending = seen_pending.clone();
            let calls = calls.clone();
            w.run_when_idle(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                seen_pending
                    .lock()
                    .unwrap()
                    .push(work.pending.load(Ordering::SeqCst));
            })
            .unwrap();
        }

        assert!(w.wait_until_idle(WAIT).unwrap());
        assert!(w.wait_until_idle(WAIT).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen_pending.lock().unwrap(), vec![0]);
        assert_eq!(work.processed.load(Ordering::SeqCst), 50);
        w.stop_and_join();
    }

    #[test]
    fn idle_callbacks_run_in_registration_order_and_survive_panics() {
        let w = worker("ordered", vec![ms(1)], Arc::new(SystemClock));
        w.start(Arc::new(CountdownWork::default())).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            w.run_when_idle(move || order.lock().unwrap().push(i)).unwrap();
        }
        w.run_when_idle(|| panic!("callback blew up")).unwrap();
        {
            let order = order.clone();
            w.run_when_idle(move || order.lock().unwrap().push(3)).unwrap();
        }

        assert!(w.wait_until_idle(WAIT).unwrap());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        assert!(w.is_active());
        w.stop_and_join();
    }

    #[test]
    fn callbacks_may_register_callbacks() {
        let w = Arc::new(worker("nested", vec![ms(1)], Arc::new(SystemClock)));
        w.start(Arc::new(CountdownWork::default())).unwrap();

        let (tx, rx) = mpsc::channel();
        let inner = w.clone();
        w.run_when_idle(move || {
            let _ = inner.run_when_idle(move || {
                let _ = tx.send("nested");
            });
        })
        .unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "nested");
        w.stop_and_join();
    }

    #[test]
    fn backoff_follows_configured_delays_and_resets_after_success() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let secs = Duration::from_secs;
        let w = worker("flaky", vec![secs(60), secs(120), secs(240)], clock.clone());
        let work = Arc::new(FlakyWork::default());
        work.failures_left.store(5, Ordering::SeqCst);

        w.start(work.clone()).unwrap();
        assert!(w.wait_until_idle(WAIT).unwrap());
        assert_eq!(
            clock.sleeps(),
            vec![secs(60), secs(120), secs(240), secs(240), secs(240)]
        );
        assert!(work.calls.load(Ordering::SeqCst) >= 6);

        // One success in between: the next failures start from the top again.
        work.failures_left.store(2, Ordering::SeqCst);
        w.wake_up().unwrap();
        assert!(w.wait_until_idle(WAIT).unwrap());
        assert_eq!(
            clock.sleeps(),
            vec![secs(60), secs(120), secs(240), secs(240), secs(240), secs(60), secs(120)]
        );

        let stats = w.stats();
        assert_eq!(stats.failures, 7);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.last_backoff, Some(secs(120)));
        w.stop_and_join();
    }

    #[test]
    fn each_backoff_is_one_sleep_of_the_full_delay() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let w = worker(
            "whole",
            vec![Duration::from_secs(1), Duration::from_secs(2)],
            clock.clone(),
        );
        let work = Arc::new(FlakyWork::default());
        work.failures_left.store(3, Ordering::SeqCst);

        w.start(work).unwrap();
        assert!(w.wait_until_idle(WAIT).unwrap());
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(2)
            ]
        );
        w.stop_and_join();
    }

    #[test]
    fn dropped_reservation_returns_to_not_started() {
        let w = worker("reserved", vec![ms(1)], Arc::new(SystemClock));
        {
            let reservation = w.reserve_start().unwrap();
            assert_eq!(w.state(), WorkerState::Running);
            assert!(matches!(w.reserve_start(), Err(WorkerError::AlreadyStarted)));
            w.run_when_idle(|| {}).unwrap();
            drop(reservation);
        }
        assert_eq!(w.state(), WorkerState::NotStarted);
        assert!(!w.is_active());

        let work = Arc::new(CountdownWork::default());
        work.pending.store(3, Ordering::SeqCst);
        w.start(work.clone()).unwrap();
        assert!(w.wait_until_idle(WAIT).unwrap());
        assert_eq!(work.processed.load(Ordering::SeqCst), 3);
        w.stop_and_join();
    }

    #[test]
    fn wake_ups_during_a_reservation_reach_the_loop() {
        let w = worker("reserved-wake", vec![ms(1)], Arc::new(SystemClock));
        let work = Arc::new(CountdownWork::default());

        let reservation = w.reserve_start().unwrap();
        work.pending.store(4, Ordering::SeqCst);
        w.wake_up().unwrap();
        reservation.launch(work.clone()).unwrap();

        assert!(w.wait_until_idle(WAIT).unwrap());
        assert_eq!(work.processed.load(Ordering::SeqCst), 4);
        w.stop_and_join();
    }

    #[test]
    fn stop_during_a_reservation_wins() {
        let w = worker("reserved-stop", vec![ms(1)], Arc::new(SystemClock));
        let reservation = w.reserve_start().unwrap();
        w.stop();
        assert!(matches!(
            reservation.launch(Arc::new(CountdownWork::default())),
            Err(WorkerError::Stopped)
        ));
        assert_eq!(w.state(), WorkerState::Stopped);
        assert!(!w.is_active());
    }

    #[test]
    fn failing_has_work_backs_off_too() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let w = worker("probe", vec![ms(3)], clock.clone());
        let work = Arc::new(FlakyWork::default());
        work.broken_has_work.store(true, Ordering::SeqCst);

        w.start(work).unwrap();
        assert!(w.wait_until_idle(WAIT).unwrap());
        assert_eq!(clock.sleeps(), vec![ms(3)]);
        w.stop_and_join();
    }

    #[test]
    fn stop_takes_effect_mid_backoff() {
        let w = worker("stuck", vec![Duration::from_secs(3600)], Arc::new(SystemClock));
        let work = Arc::new(FlakyWork::default());
        work.failures_left.store(usize::MAX, Ordering::SeqCst);

        w.start(work).unwrap();
        assert!(eventually(WAIT, || w.stats().failures >= 1));

        let stopped_at = Instant::now();
        w.stop();
        assert!(eventually(WAIT, || !w.is_active()));
        assert!(stopped_at.elapsed() < WAIT);
    }

    #[test]
    fn panicking_work_is_treated_as_failure() {
        struct PanicOnce(AtomicBool);
        impl Work for PanicOnce {
            type Error = String;
            fn has_work(&self) -> Result<bool, String> {
                Ok(false)
            }
            fn do_work(&self) -> Result<(), String> {
                if !self.0.swap(true, Ordering::SeqCst) {
                    panic!("boom");
                }
                Ok(())
            }
        }

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let w = worker("panicky", vec![ms(7)], clock.clone());
        w.start(Arc::new(PanicOnce(AtomicBool::new(false)))).unwrap();

        assert!(w.wait_until_idle(WAIT).unwrap());
        assert_eq!(clock.sleeps(), vec![ms(7)]);
        assert!(w.is_active());
        w.stop_and_join();
    }
}
