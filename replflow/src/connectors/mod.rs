//! Connector collaborator interfaces.
//!
//! This module provides:
//! - The Source and Destination process contracts
//! - Timeout monitors consulted by the heartbeat sender
//! - SyncPersistence for acknowledged destination state

mod monitors;
mod persistence;

pub use monitors::{
    ActionTimeoutMonitor, BeatMonitor, DestinationTimeoutMonitor, SourceHeartbeatMonitor,
};
pub use persistence::{InMemorySyncPersistence, SyncPersistence};

use crate::message::{ConfiguredCatalog, SyncMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;

/// Launch configuration handed to a connector's `start`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Connector-specific configuration.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Streams to read or write.
    #[serde(default)]
    pub catalog: ConfiguredCatalog,
    /// Prior state to resume from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
}

impl ConnectorConfig {
    /// Creates a config for the given catalog.
    #[must_use]
    pub fn new(catalog: ConfiguredCatalog) -> Self {
        Self {
            catalog,
            ..Self::default()
        }
    }

    /// Sets the connector configuration.
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Sets the resume state.
    #[must_use]
    pub fn with_state(mut self, state: serde_json::Value) -> Self {
        self.state = Some(state);
        self
    }
}

/// A running source connector process.
///
/// All methods take `&self`: the reader task, the starter and the
/// orchestrator's `cancel` share one instance.
#[async_trait]
pub trait Source: Send + Sync + Debug {
    /// Starts the process.
    async fn start(&self, config: &ConnectorConfig, job_root: &Path) -> anyhow::Result<()>;

    /// Reads one message if one is available.
    async fn attempt_read(&self) -> anyhow::Result<Option<SyncMessage>>;

    /// Returns true once the process has exited and its output is drained.
    fn is_finished(&self) -> bool;

    /// Returns the exit code of a finished process.
    fn exit_value(&self) -> i32;

    /// Waits for the process to exit and releases its resources.
    async fn close(&self) -> anyhow::Result<()>;

    /// Kills the process.
    async fn cancel(&self) -> anyhow::Result<()>;
}

/// A running destination connector process.
#[async_trait]
pub trait Destination: Send + Sync + Debug {
    /// Starts the process.
    async fn start(&self, config: &ConnectorConfig, job_root: &Path) -> anyhow::Result<()>;

    /// Writes one message to the process input.
    async fn accept(&self, message: SyncMessage) -> anyhow::Result<()>;

    /// Closes the process input.
    async fn notify_end_of_input(&self) -> anyhow::Result<()>;

    /// Reads one message emitted by the process, if one is available.
    async fn attempt_read(&self) -> anyhow::Result<Option<SyncMessage>>;

    /// Returns true once the process has exited and its output is drained.
    fn is_finished(&self) -> bool;

    /// Returns the exit code of a finished process.
    fn exit_value(&self) -> i32;

    /// Waits for the process to exit and releases its resources.
    async fn close(&self) -> anyhow::Result<()>;

    /// Kills the process.
    async fn cancel(&self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::StreamKey;
    use serde_json::json;

    #[test]
    fn test_connector_config_builder() {
        let catalog = ConfiguredCatalog::default().with_stream(StreamKey::new("users"), json!({}));
        let config = ConnectorConfig::new(catalog)
            .with_config(json!({"host": "localhost"}))
            .with_state(json!({"cursor": 3}));

        assert_eq!(config.config["host"], "localhost");
        assert_eq!(config.state, Some(json!({"cursor": 3})));
        assert_eq!(config.catalog.streams.len(), 1);
    }
}
