//! Bounded, cancellable fan-out (§5).
//!
//! The teacher's `concurrency/manager.rs` implements an adaptive,
//! ML-driven concurrency controller (weighted prediction model tuning pool
//! width at runtime) with no counterpart in the spec, which asks only for
//! a bounded, cancellable fan-out. This module is that simpler thing: a
//! `Semaphore` sized from [`crate::config`] and a `CancellationToken`
//! threaded through every blocking call.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Ambient execution context threaded through blocking APIs: bounds
/// concurrent I/O and carries the cancellation signal (§9: "Ambient
/// context for cancellation and logging" is made explicit here).
#[derive(Clone)]
pub struct Budget {
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Budget {
    /// `permits` bounds how many concurrent network/disk operations may be
    /// in flight at once. Defaults to the host's CPU count when the caller
    /// has no stronger preference.
    pub fn new(permits: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits.max(1))),
            cancel: CancellationToken::new(),
        }
    }

    pub fn default_for_host() -> Self {
        Self::new(std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4))
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `fut` once a permit is available, aborting early if cancelled
    /// first. Returns `None` on cancellation, `Some(output)` otherwise.
    pub async fn run<F, T>(&self, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        if self.cancel.is_cancelled() {
            return None;
        }
        let permit = tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => permit.ok()?,
            _ = self.cancel.cancelled() => return None,
        };
        let result = tokio::select! {
            result = fut => Some(result),
            _ = self.cancel.cancelled() => None,
        };
        drop(permit);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_executes_future() {
        let budget = Budget::new(2);
        let out = budget.run(async { 1 + 1 }).await;
        assert_eq!(out, Some(2));
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let budget = Budget::new(2);
        budget.cancel();
        let out = budget.run(async { 42 }).await;
        assert_eq!(out, None);
    }
}
