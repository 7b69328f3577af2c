//! Single-threaded background workers.
//!
//! ## Design
//!
//! - One dedicated OS thread per worker runs an idempotent unit of work
//!   (`Work::do_work`) until there is nothing left, then blocks on a
//!   condition variable until woken
//! - Producers on any thread call `wake_up()` after making work available
//! - Failures are logged and retried after a delay from a `BackoffPolicy`;
//!   they never stop the worker
//! - `run_when_idle` callbacks give tests a deterministic "queue drained" point
//!
//! ## Lifecycle
//!
//! `NotStarted -> Running -> Stopped`. `Stopped` is terminal.

pub mod backoff;
pub mod background_worker;

pub use backoff::BackoffPolicy;
pub use background_worker::{
    BackgroundWorker, StartReservation, Work, WorkerConfig, WorkerState, WorkerStats,
};

/// Misuse of the worker lifecycle. These indicate a bug in the caller.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker already started")]
    AlreadyStarted,
    #[error("worker not started")]
    NotStarted,
    #[error("worker stopped")]
    Stopped,
    #[error("backoff delay list must not be empty")]
    EmptyBackoff,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
