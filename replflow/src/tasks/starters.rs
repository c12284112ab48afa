//! Tasks that start the connector processes.

use super::ReplicationTask;
use crate::connectors::{ConnectorConfig, Destination, Source};
use crate::errors::ReplicationError;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Starts the source process.
pub struct SourceStarter {
    source: Arc<dyn Source>,
    config: ConnectorConfig,
    job_root: PathBuf,
}

impl SourceStarter {
    /// Creates the task.
    #[must_use]
    pub fn new(source: Arc<dyn Source>, config: ConnectorConfig, job_root: PathBuf) -> Self {
        Self {
            source,
            config,
            job_root,
        }
    }
}

impl fmt::Debug for SourceStarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceStarter")
            .field("job_root", &self.job_root)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReplicationTask for SourceStarter {
    fn name(&self) -> &'static str {
        "start_source"
    }

    async fn run(&self) -> Result<(), ReplicationError> {
        info!(task = self.name(), "Starting source");
        self.source
            .start(&self.config, &self.job_root)
            .await
            .map_err(|e| ReplicationError::source_with_cause("Source process start failed", e))
    }
}

/// Starts the destination process.
pub struct DestinationStarter {
    destination: Arc<dyn Destination>,
    config: ConnectorConfig,
    job_root: PathBuf,
}

impl DestinationStarter {
    /// Creates the task.
    #[must_use]
    pub fn new(
        destination: Arc<dyn Destination>,
        config: ConnectorConfig,
        job_root: PathBuf,
    ) -> Self {
        Self {
            destination,
            config,
            job_root,
        }
    }
}

impl fmt::Debug for DestinationStarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationStarter")
            .field("job_root", &self.job_root)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReplicationTask for DestinationStarter {
    fn name(&self) -> &'static str {
        "start_destination"
    }

    async fn run(&self) -> Result<(), ReplicationError> {
        info!(task = self.name(), "Starting destination");
        self.destination
            .start(&self.config, &self.job_root)
            .await
            .map_err(|e| {
                ReplicationError::destination_with_cause("Destination process start failed", e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FailureOrigin;
    use crate::testing::{RecordingDestination, ScriptedSource};

    #[tokio::test]
    async fn test_source_start_failure_is_attributed() {
        let source = Arc::new(ScriptedSource::new(vec![]).with_start_error("no image"));
        let task = SourceStarter::new(source, ConnectorConfig::default(), PathBuf::from("/tmp"));

        let err = task.run().await.unwrap_err();
        assert_eq!(err.origin(), FailureOrigin::Source);
        assert_eq!(err.to_string(), "Source process start failed");
        assert!(err.stack_trace().contains("no image"));
    }

    #[tokio::test]
    async fn test_destination_start() {
        let destination = Arc::new(RecordingDestination::new());
        let task = DestinationStarter::new(
            destination.clone(),
            ConnectorConfig::default(),
            PathBuf::from("/tmp"),
        );

        task.run().await.unwrap();
        assert_eq!(destination.start_count(), 1);
    }
}
