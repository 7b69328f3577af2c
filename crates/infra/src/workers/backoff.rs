//! Failure backoff for background workers.

use std::time::Duration;

use super::WorkerError;

/// Ordered list of delays applied after consecutive failures.
///
/// The first failure waits `delays[0]`, each further failure without an
/// intervening success moves one step along the list, clamping at the last
/// entry. A success resets to the first entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    delays: Vec<Duration>,
    next: usize,
}

impl BackoffPolicy {
    pub fn new(delays: Vec<Duration>) -> Result<Self, WorkerError> {
        if delays.is_empty() {
            return Err(WorkerError::EmptyBackoff);
        }
        Ok(Self { delays, next: 0 })
    }

    /// Delay for the current failure; advances the position.
    pub fn next_delay(&mut self) -> Duration {
        let last = self.delays.len() - 1;
        let delay = self.delays[self.next.min(last)];
        if self.next < last {
            self.next += 1;
        }
        delay
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}
