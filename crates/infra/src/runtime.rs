//! Bridge from the blocking worker thread into the tokio runtime.

use std::future::Future;

use tokio::runtime::{Handle, RuntimeFlavor};

/// Drive `fut` to completion on `runtime` from synchronous code.
///
/// Off-runtime threads (the validation worker) block directly. Inside a
/// multi-threaded runtime the current worker is handed off first with
/// `block_in_place`; calling this from a current-thread runtime panics, as
/// `Handle::block_on` does.
pub(crate) fn block_on<F: Future>(runtime: &Handle, fut: F) -> F::Output {
    match Handle::try_current() {
        Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| runtime.block_on(fut))
        }
        _ => runtime.block_on(fut),
    }
}
