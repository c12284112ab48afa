//! Identity and inputs of one replication attempt.

use crate::connectors::ConnectorConfig;
use crate::message::ConfiguredCatalog;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies the job attempt a replication belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationContext {
    /// Job id.
    pub job_id: i64,
    /// Attempt number within the job.
    pub attempt: u32,
    /// Connection being synced.
    pub connection_id: Uuid,
    /// Owning workspace.
    pub workspace_id: Uuid,
    /// Workload id used for heartbeats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_id: Option<String>,
    /// Source connector image.
    #[serde(default)]
    pub source_image: String,
    /// Destination connector image.
    #[serde(default)]
    pub destination_image: String,
}

impl ReplicationContext {
    /// Creates a context for a job attempt with fresh connection and workspace ids.
    #[must_use]
    pub fn new(job_id: i64, attempt: u32) -> Self {
        Self {
            job_id,
            attempt,
            connection_id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            workload_id: None,
            source_image: String::new(),
            destination_image: String::new(),
        }
    }

    /// Sets the connection id.
    #[must_use]
    pub fn with_connection_id(mut self, connection_id: Uuid) -> Self {
        self.connection_id = connection_id;
        self
    }

    /// Sets the workload id.
    #[must_use]
    pub fn with_workload_id(mut self, workload_id: impl Into<String>) -> Self {
        self.workload_id = Some(workload_id.into());
        self
    }

    /// Sets the connector images.
    #[must_use]
    pub fn with_images(
        mut self,
        source_image: impl Into<String>,
        destination_image: impl Into<String>,
    ) -> Self {
        self.source_image = source_image.into();
        self.destination_image = destination_image.into();
        self
    }

    /// Returns the workload id, falling back to `<job_id>_<attempt>`.
    #[must_use]
    pub fn workload_id(&self) -> String {
        self.workload_id
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.job_id, self.attempt))
    }
}

/// Everything needed to run one replication attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationInput {
    /// Attempt identity.
    pub context: ReplicationContext,
    /// Source launch configuration.
    pub source_config: ConnectorConfig,
    /// Destination launch configuration.
    pub destination_config: ConnectorConfig,
    /// Streams being replicated.
    pub catalog: ConfiguredCatalog,
}

impl ReplicationInput {
    /// Creates an input where both connectors receive `catalog`.
    #[must_use]
    pub fn new(context: ReplicationContext, catalog: ConfiguredCatalog) -> Self {
        Self {
            context,
            source_config: ConnectorConfig::new(catalog.clone()),
            destination_config: ConnectorConfig::new(catalog.clone()),
            catalog,
        }
    }

    /// Sets the source configuration.
    #[must_use]
    pub fn with_source_config(mut self, config: ConnectorConfig) -> Self {
        self.source_config = config;
        self
    }

    /// Sets the destination configuration.
    #[must_use]
    pub fn with_destination_config(mut self, config: ConnectorConfig) -> Self {
        self.destination_config = config;
        self
    }
}
