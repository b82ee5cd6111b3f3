//! Run-scoped success/failure accounting
//!
//! One [`StatusAccumulator`] is created per run and shared by every node of the
//! task tree. Items report into it; the run outcome is derived on read.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::RunStatus;

/// Shared tally of per-item success and failure signals
#[derive(Debug, Default)]
pub struct StatusAccumulator {
    successes: AtomicU64,
    failures: AtomicU64,
}

impl StatusAccumulator {
    /// Create an accumulator with no signals recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successfully processed item
    pub fn success_item(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one failure
    pub fn failure_occurred(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of success signals so far
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Number of failure signals so far
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Classify the run from the signals recorded so far
    pub fn status(&self) -> RunStatus {
        match (self.successes(), self.failures()) {
            (_, 0) => RunStatus::Success,
            (0, _) => RunStatus::Failure,
            _ => RunStatus::Errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn no_signals_is_success() {
        assert_eq!(StatusAccumulator::new().status(), RunStatus::Success);
    }

    #[test]
    fn only_successes_is_success() {
        let acc = StatusAccumulator::new();
        acc.success_item();
        acc.success_item();
        assert_eq!(acc.status(), RunStatus::Success);
    }

    #[test]
    fn only_failures_is_failure() {
        let acc = StatusAccumulator::new();
        acc.failure_occurred();
        acc.failure_occurred();
        assert_eq!(acc.status(), RunStatus::Failure);
    }

    #[test]
    fn mixed_signals_are_errors() {
        let acc = StatusAccumulator::new();
        acc.success_item();
        acc.failure_occurred();
        assert_eq!(acc.status(), RunStatus::Errors);
    }

    #[tokio::test]
    async fn concurrent_signals_are_all_counted() {
        let acc = Arc::new(StatusAccumulator::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let acc = Arc::clone(&acc);
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    if i % 2 == 0 {
                        acc.success_item();
                    } else {
                        acc.failure_occurred();
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.ok();
        }
        assert_eq!(acc.successes(), 800);
        assert_eq!(acc.failures(), 800);
        assert_eq!(acc.status(), RunStatus::Errors);
    }
}
