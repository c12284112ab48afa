//! Engine configuration.

use crate::processing::DEFAULT_STATE_TRACKER_MEMORY_LIMIT_BYTES;
use crate::state::DEFAULT_MAX_FAILURES;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for one replication run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicationConfig {
    /// Capacity of the source-to-processor queue.
    #[serde(default = "default_buffer_size")]
    pub source_buffer_size: usize,
    /// Capacity of the processor-to-destination queue.
    #[serde(default = "default_buffer_size")]
    pub destination_buffer_size: usize,
    /// Sleep between empty connector reads, in milliseconds.
    #[serde(default = "default_read_poll_interval_ms")]
    pub read_poll_interval_ms: u64,
    /// Whether to send workload heartbeats.
    #[serde(default = "default_heartbeat_enabled")]
    pub heartbeat_enabled: bool,
    /// Seconds between heartbeat attempts.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Seconds without a successful heartbeat before the run fails.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    /// Cap on stored failures.
    #[serde(default = "default_max_failures")]
    pub max_failures: usize,
    /// Budget for source states awaiting a destination acknowledgement.
    #[serde(default = "default_state_tracker_memory_limit_bytes")]
    pub state_tracker_memory_limit_bytes: usize,
    /// Capacity of the schema validation job queue.
    #[serde(default = "default_buffer_size")]
    pub validation_queue_size: usize,
    /// Seconds to wait for pending validations at shutdown.
    #[serde(default = "default_validation_shutdown_timeout_secs")]
    pub validation_shutdown_timeout_secs: u64,
}

fn default_buffer_size() -> usize {
    1000
}

fn default_read_poll_interval_ms() -> u64 {
    10
}

fn default_heartbeat_enabled() -> bool {
    true
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

fn default_heartbeat_timeout_secs() -> u64 {
    600
}

fn default_max_failures() -> usize {
    DEFAULT_MAX_FAILURES
}

fn default_state_tracker_memory_limit_bytes() -> usize {
    DEFAULT_STATE_TRACKER_MEMORY_LIMIT_BYTES
}

fn default_validation_shutdown_timeout_secs() -> u64 {
    10
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            source_buffer_size: default_buffer_size(),
            destination_buffer_size: default_buffer_size(),
            read_poll_interval_ms: default_read_poll_interval_ms(),
            heartbeat_enabled: default_heartbeat_enabled(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            max_failures: default_max_failures(),
            state_tracker_memory_limit_bytes: default_state_tracker_memory_limit_bytes(),
            validation_queue_size: default_buffer_size(),
            validation_shutdown_timeout_secs: default_validation_shutdown_timeout_secs(),
        }
    }
}

impl ReplicationConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Sets both queue capacities.
    #[must_use]
    pub fn with_buffer_sizes(mut self, source: usize, destination: usize) -> Self {
        self.source_buffer_size = source;
        self.destination_buffer_size = destination;
        self
    }

    /// Sets the idle read poll interval.
    #[must_use]
    pub fn with_read_poll_interval(mut self, interval: Duration) -> Self {
        self.read_poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enables or disables heartbeats.
    #[must_use]
    pub fn with_heartbeat_enabled(mut self, enabled: bool) -> Self {
        self.heartbeat_enabled = enabled;
        self
    }

    /// Sets the heartbeat interval and timeout, in seconds.
    #[must_use]
    pub fn with_heartbeat(mut self, interval_secs: u64, timeout_secs: u64) -> Self {
        self.heartbeat_interval_secs = interval_secs;
        self.heartbeat_timeout_secs = timeout_secs;
        self
    }

    /// Sets the failure cap.
    #[must_use]
    pub fn with_max_failures(mut self, max_failures: usize) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Sets the budget for unacknowledged states.
    #[must_use]
    pub fn with_state_tracker_memory_limit(mut self, bytes: usize) -> Self {
        self.state_tracker_memory_limit_bytes = bytes;
        self
    }

    /// Returns the idle read poll interval.
    #[must_use]
    pub fn read_poll_interval(&self) -> Duration {
        Duration::from_millis(self.read_poll_interval_ms)
    }

    /// Returns the heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Returns the heartbeat timeout.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Returns the validator shutdown timeout.
    #[must_use]
    pub fn validation_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ReplicationConfig::default();
        assert_eq!(config.source_buffer_size, 1000);
        assert_eq!(config.destination_buffer_size, 1000);
        assert_eq!(config.read_poll_interval(), Duration::from_millis(10));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(600));
        assert_eq!(config.max_failures, 100);
        assert_eq!(config.state_tracker_memory_limit_bytes, 10 * 1024 * 1024);
        assert!(config.heartbeat_enabled);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = ReplicationConfig::from_json(r#"{"source_buffer_size": 5}"#).unwrap();
        assert_eq!(config.source_buffer_size, 5);
        assert_eq!(
            config,
            ReplicationConfig::default().with_buffer_sizes(5, 1000)
        );
    }

    #[test]
    fn test_from_json_rejects_unknown_fields() {
        assert!(ReplicationConfig::from_json(r#"{"buffer": 5}"#).is_err());
    }

    #[test]
    fn test_builder() {
        let config = ReplicationConfig::new()
            .with_heartbeat(1, 5)
            .with_read_poll_interval(Duration::from_millis(3))
            .with_heartbeat_enabled(false);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(config.read_poll_interval_ms, 3);
        assert!(!config.heartbeat_enabled);
    }
}
