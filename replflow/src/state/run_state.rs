//! Shared run state for one replication job.

use super::Failure;
use crate::errors::ReplicationError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Default cap on stored failures.
pub const DEFAULT_MAX_FAILURES: usize = 100;

/// Abort/cancel/fail flags and the bounded failure log for one job.
///
/// Every pipeline task holds an `Arc<RunState>` and polls
/// [`should_abort`](Self::should_abort) once per loop iteration. The failure
/// log keeps at most `max_failures` entries plus a single truncation notice.
#[derive(Debug)]
pub struct RunState {
    cancelled: AtomicBool,
    failed: AtomicBool,
    abort_requested: AtomicBool,
    running: AtomicBool,
    failures: Mutex<Vec<Failure>>,
    max_failures: usize,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    /// Creates a run state with the default failure cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_failures(DEFAULT_MAX_FAILURES)
    }

    /// Creates a run state that stores at most `max_failures` failures.
    #[must_use]
    pub fn with_max_failures(max_failures: usize) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            abort_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
            failures: Mutex::new(Vec::new()),
            max_failures,
        }
    }

    /// Returns true once the job was cancelled, failed, or explicitly aborted.
    #[must_use]
    pub fn should_abort(&self) -> bool {
        self.abort_requested.load(Ordering::SeqCst)
            || self.cancelled.load(Ordering::SeqCst)
            || self.failed.load(Ordering::SeqCst)
    }

    /// Requests that every task stop at its next iteration.
    pub fn abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
    }

    /// Marks the job as cancelled.
    pub fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns whether the job was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Marks the job as failed.
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    /// Returns whether the job has failed.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Marks the sync phase as running.
    pub fn mark_running(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Marks the sync phase as no longer running.
    pub fn mark_stopped(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Returns whether the sync phase is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Classifies and records a task error.
    ///
    /// Returns false when the failure was dropped because the log is full.
    pub fn track_failure(&self, err: &ReplicationError) -> bool {
        warn!(
            origin = %err.origin(),
            error = %err.stack_trace(),
            "Tracking replication failure"
        );
        self.track(Failure::from_error(err))
    }

    /// Records a failure, honouring the cap.
    ///
    /// Returns false when the failure was dropped because the log is full.
    pub fn track(&self, failure: Failure) -> bool {
        let mut failures = self.failures.lock();
        match failures.len().cmp(&self.max_failures) {
            std::cmp::Ordering::Less => {
                failures.push(failure);
                true
            }
            std::cmp::Ordering::Equal => {
                failures.push(Failure::truncation_notice(self.max_failures));
                false
            }
            std::cmp::Ordering::Greater => false,
        }
    }

    /// Returns a copy of the recorded failures in insertion order.
    #[must_use]
    pub fn failures(&self) -> Vec<Failure> {
        self.failures.lock().clone()
    }

    /// Returns the number of stored failures, including a truncation notice.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures.lock().len()
    }

    /// Returns the failure cap.
    #[must_use]
    pub fn max_failures(&self) -> usize {
        self.max_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FailureOrigin;
    use std::sync::Arc;

    #[test]
    fn test_default_flags() {
        let state = RunState::new();
        assert!(!state.should_abort());
        assert!(!state.is_cancelled());
        assert!(!state.has_failed());
        assert!(!state.is_running());
    }

    #[test]
    fn test_should_abort_derivation() {
        let cancelled = RunState::new();
        cancelled.mark_cancelled();
        assert!(cancelled.should_abort());

        let failed = RunState::new();
        failed.mark_failed();
        assert!(failed.should_abort());

        let aborted = RunState::new();
        aborted.abort();
        assert!(aborted.should_abort());
        assert!(!aborted.has_failed());
    }

    #[test]
    fn test_track_failure_classifies_origin() {
        let state = RunState::new();
        state.track_failure(&ReplicationError::destination("boom"));

        let failures = state.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].origin, FailureOrigin::Destination);
    }

    #[test]
    fn test_failure_truncation() {
        let max = 5;
        let state = RunState::with_max_failures(max);

        for i in 0..=max {
            state.track_failure(&ReplicationError::replication(format!("failure {i}")));
        }

        let failures = state.failures();
        assert_eq!(failures.len(), max + 1);
        assert_eq!(failures[max - 1].internal_message, "failure 4");
        assert!(failures[max].internal_message.contains("truncated"));

        for i in 0..10 {
            assert!(!state.track_failure(&ReplicationError::replication(format!("extra {i}"))));
        }
        assert_eq!(state.failure_count(), max + 1);
    }

    #[test]
    fn test_concurrent_tracking_respects_cap() {
        let state = Arc::new(RunState::with_max_failures(10));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let state = state.clone();
                std::thread::spawn(move || {
                    for i in 0..20 {
                        state.track_failure(&ReplicationError::replication(format!("{t}-{i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            let _ = handle.join();
        }

        assert_eq!(state.failure_count(), 11);
    }
}
