//! Workload heartbeat, a dead man's switch for the replication.
//!
//! The sender reports liveness on a fixed interval. A "gone" answer cancels
//! the run; failing to get through for longer than the timeout fails it.

use crate::connectors::{DestinationTimeoutMonitor, SourceHeartbeatMonitor};
use crate::errors::{BoxError, ReplicationError};
use crate::state::RunState;
use crate::tasks::ReplicationTask;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

/// Errors returned by a [`HeartbeatClient`].
#[derive(Debug, Error)]
pub enum HeartbeatError {
    /// The workload is no longer expected to run (HTTP 410).
    #[error("workload is no longer expected to run")]
    Gone,
    /// Any other failure; the next interval retries.
    #[error("heartbeat request failed")]
    Transient(#[source] BoxError),
}

/// Transport for workload heartbeats.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HeartbeatClient: Send + Sync {
    /// Reports that `workload_id` is alive.
    async fn workload_heartbeat(&self, workload_id: &str) -> Result<(), HeartbeatError>;
}

/// State of the heartbeat sender. `Cancelled` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    /// Heartbeats are being sent.
    Beating,
    /// The platform said the workload is gone.
    Cancelled,
    /// No heartbeat got through within the timeout.
    Failed,
}

/// Periodically sends workload heartbeats.
pub struct HeartbeatSender {
    client: Arc<dyn HeartbeatClient>,
    workload_id: String,
    run_state: Arc<RunState>,
    interval: Duration,
    timeout: Duration,
    destination_monitor: Option<Arc<dyn DestinationTimeoutMonitor>>,
    source_monitor: Option<Arc<dyn SourceHeartbeatMonitor>>,
    last_success: Mutex<Instant>,
    state: Mutex<HeartbeatState>,
}

impl fmt::Debug for HeartbeatSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeartbeatSender")
            .field("workload_id", &self.workload_id)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl HeartbeatSender {
    /// Creates a sender for `workload_id`.
    #[must_use]
    pub fn new(
        client: Arc<dyn HeartbeatClient>,
        workload_id: impl Into<String>,
        run_state: Arc<RunState>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            workload_id: workload_id.into(),
            run_state,
            interval,
            timeout,
            destination_monitor: None,
            source_monitor: None,
            last_success: Mutex::new(Instant::now()),
            state: Mutex::new(HeartbeatState::Beating),
        }
    }

    /// Skips heartbeats while the destination is stuck on an action.
    #[must_use]
    pub fn with_destination_monitor(mut self, monitor: Arc<dyn DestinationTimeoutMonitor>) -> Self {
        self.destination_monitor = Some(monitor);
        self
    }

    /// Skips heartbeats while the source has stopped beating.
    #[must_use]
    pub fn with_source_monitor(mut self, monitor: Arc<dyn SourceHeartbeatMonitor>) -> Self {
        self.source_monitor = Some(monitor);
        self
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> HeartbeatState {
        *self.state.lock()
    }

    fn should_skip(&self) -> bool {
        if let Some(monitor) = &self.destination_monitor {
            if monitor.has_timed_out() {
                warn!(
                    since_last_action_secs = monitor.time_since_last_action().as_secs(),
                    "Destination action timed out, skipping heartbeat"
                );
                return true;
            }
        }
        if let Some(monitor) = &self.source_monitor {
            if monitor.is_beating() == Some(false) {
                warn!(
                    since_last_beat_secs = monitor.time_since_last_beat().map(|d| d.as_secs()),
                    "Source is not beating, skipping heartbeat"
                );
                return true;
            }
        }
        false
    }

    /// Makes one heartbeat attempt and returns the resulting state.
    pub async fn attempt(&self) -> HeartbeatState {
        let current = self.state();
        if current != HeartbeatState::Beating || self.should_skip() {
            return current;
        }

        info!(workload_id = %self.workload_id, "Sending workload heartbeat");
        let next = match self.client.workload_heartbeat(&self.workload_id).await {
            Ok(()) => {
                *self.last_success.lock() = Instant::now();
                HeartbeatState::Beating
            }
            Err(HeartbeatError::Gone) => {
                info!("Workload is gone, cancelling replication");
                self.run_state.mark_cancelled();
                HeartbeatState::Cancelled
            }
            Err(err) => {
                let since_success = self.last_success.lock().elapsed();
                if since_success > self.timeout {
                    warn!(
                        error = %err,
                        timeout_secs = self.timeout.as_secs(),
                        "Have not been able to update heartbeat for more than the timeout duration, shutting down heartbeat"
                    );
                    self.run_state.mark_failed();
                    self.run_state.abort();
                    self.run_state.track_failure(&ReplicationError::workload_heartbeat(
                        "Workload Heartbeat Error",
                        Some(err.into()),
                    ));
                    HeartbeatState::Failed
                } else {
                    warn!(error = %err, "Error while trying to heartbeat, re-trying");
                    HeartbeatState::Beating
                }
            }
        };
        *self.state.lock() = next;
        next
    }
}

#[async_trait]
impl ReplicationTask for HeartbeatSender {
    fn name(&self) -> &'static str {
        "workload_heartbeat"
    }

    async fn run(&self) -> Result<(), ReplicationError> {
        info!(task = self.name(), "Starting workload heartbeat");
        *self.last_success.lock() = Instant::now();
        loop {
            tokio::time::sleep(self.interval).await;
            let state = self.attempt().await;
            if state != HeartbeatState::Beating {
                info!(task = self.name(), ?state, "Heartbeat stopped");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::{ActionTimeoutMonitor, BeatMonitor};
    use crate::state::FailureOrigin;

    fn sender(client: MockHeartbeatClient, run_state: Arc<RunState>, timeout: Duration) -> HeartbeatSender {
        HeartbeatSender::new(
            Arc::new(client),
            "workload-1",
            run_state,
            Duration::from_millis(5),
            timeout,
        )
    }

    #[tokio::test]
    async fn test_success_keeps_beating() {
        let mut client = MockHeartbeatClient::new();
        client
            .expect_workload_heartbeat()
            .withf(|id: &str| id == "workload-1")
            .times(1)
            .returning(|_| Ok(()));
        let run_state = Arc::new(RunState::new());

        let sender = sender(client, run_state.clone(), Duration::from_secs(60));
        assert_eq!(sender.attempt().await, HeartbeatState::Beating);
        assert!(!run_state.should_abort());
    }

    #[tokio::test]
    async fn test_gone_cancels_and_stops() {
        let mut client = MockHeartbeatClient::new();
        client
            .expect_workload_heartbeat()
            .times(1)
            .returning(|_| Err(HeartbeatError::Gone));
        let run_state = Arc::new(RunState::new());

        let sender = sender(client, run_state.clone(), Duration::from_secs(60));
        tokio::time::timeout(Duration::from_secs(1), sender.run())
            .await
            .expect("heartbeat should stop")
            .unwrap();

        assert_eq!(sender.state(), HeartbeatState::Cancelled);
        assert!(run_state.is_cancelled());
        assert!(!run_state.has_failed());
    }

    #[tokio::test]
    async fn test_transient_error_within_timeout_retries() {
        let mut client = MockHeartbeatClient::new();
        client
            .expect_workload_heartbeat()
            .times(1)
            .returning(|_| Err(HeartbeatError::Transient("connection reset".into())));
        let run_state = Arc::new(RunState::new());

        let sender = sender(client, run_state.clone(), Duration::from_secs(60));
        assert_eq!(sender.attempt().await, HeartbeatState::Beating);
        assert!(!run_state.has_failed());
        assert_eq!(run_state.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_error_past_timeout_fails_run() {
        let mut client = MockHeartbeatClient::new();
        client
            .expect_workload_heartbeat()
            .times(1)
            .returning(|_| Err(HeartbeatError::Transient("connection reset".into())));
        let run_state = Arc::new(RunState::new());

        let sender = sender(client, run_state.clone(), Duration::ZERO);
        tokio::time::timeout(Duration::from_secs(1), sender.run())
            .await
            .expect("heartbeat should stop")
            .unwrap();

        assert_eq!(sender.state(), HeartbeatState::Failed);
        assert!(run_state.has_failed());
        assert!(run_state.should_abort());
        let failures = run_state.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].origin, FailureOrigin::Platform);
        assert_eq!(failures[0].internal_message, "Workload Heartbeat Error");
    }

    #[tokio::test]
    async fn test_skips_when_destination_timed_out() {
        let mut client = MockHeartbeatClient::new();
        client.expect_workload_heartbeat().times(0);
        let monitor = Arc::new(ActionTimeoutMonitor::new(Duration::ZERO));
        monitor.start_action();
        std::thread::sleep(Duration::from_millis(2));

        let sender = sender(client, Arc::new(RunState::new()), Duration::from_secs(60))
            .with_destination_monitor(monitor);
        assert_eq!(sender.attempt().await, HeartbeatState::Beating);
    }

    #[tokio::test]
    async fn test_skips_when_source_not_beating() {
        let mut client = MockHeartbeatClient::new();
        client.expect_workload_heartbeat().times(0);
        let monitor = Arc::new(BeatMonitor::new(Duration::ZERO));
        monitor.beat();
        std::thread::sleep(Duration::from_millis(2));

        let sender = sender(client, Arc::new(RunState::new()), Duration::from_secs(60))
            .with_source_monitor(monitor);
        assert_eq!(sender.attempt().await, HeartbeatState::Beating);
    }

    #[tokio::test]
    async fn test_terminal_state_is_sticky() {
        let mut client = MockHeartbeatClient::new();
        client
            .expect_workload_heartbeat()
            .times(1)
            .returning(|_| Err(HeartbeatError::Gone));

        let sender = sender(client, Arc::new(RunState::new()), Duration::from_secs(60));
        assert_eq!(sender.attempt().await, HeartbeatState::Cancelled);
        assert_eq!(sender.attempt().await, HeartbeatState::Cancelled);
    }
}
