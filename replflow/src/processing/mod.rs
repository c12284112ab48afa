//! Message processing collaborators.
//!
//! This module provides:
//! - The MessageProcessor contract used by every pipeline task
//! - The optional MissingStateInjector contract used by the source reader
//! - ReplicationHelper, the default processor, and its trackers

mod helper;
mod state_injector;
mod stats;
mod stream_status;

pub use helper::{ReplicationHelper, PROGRESS_LOG_INTERVAL};
pub use state_injector::StreamStateInjector;
pub use stats::{state_checksum, SyncStatsTracker, DEFAULT_STATE_TRACKER_MEMORY_LIMIT_BYTES};
pub use stream_status::StreamStatusCompletionTracker;

use crate::message::SyncMessage;
use crate::observability::PerformanceMetrics;
use crate::worker::{ReplicationInput, ReplicationOutput};
use async_trait::async_trait;
use std::fmt::Debug;
use std::path::Path;

/// Bookkeeping and transformation applied to every message of a sync.
///
/// One instance is shared by all pipeline tasks and the orchestrator, so
/// every method takes `&self`.
#[async_trait]
pub trait MessageProcessor: Send + Sync + Debug {
    /// Prepares the processor for a run.
    fn initialize(&self, input: &ReplicationInput, job_root: &Path) -> anyhow::Result<()>;

    /// Tracks a source message and returns it, possibly transformed.
    async fn internal_process_message_from_source(
        &self,
        message: SyncMessage,
    ) -> anyhow::Result<SyncMessage>;

    /// Tracks a destination message.
    async fn internal_process_message_from_destination(
        &self,
        message: SyncMessage,
    ) -> anyhow::Result<()>;

    /// Processes a source message; `None` means nothing should be forwarded.
    async fn process_message_from_source(
        &self,
        message: SyncMessage,
    ) -> anyhow::Result<Option<SyncMessage>> {
        self.internal_process_message_from_source(message)
            .await
            .map(Some)
    }

    /// Processes a message emitted by the destination.
    async fn process_message_from_destination(&self, message: SyncMessage) -> anyhow::Result<()> {
        self.internal_process_message_from_destination(message).await
    }

    /// Returns trailing stream-status messages to deliver to the destination.
    fn get_stream_status_to_send(&self, exit_code: i32) -> Vec<SyncMessage>;

    /// Called once the source finished cleanly.
    fn end_of_source(&self);

    /// Called once the destination finished cleanly.
    fn end_of_destination(&self);

    /// Called once the whole replication finished.
    fn end_of_replication(&self);

    /// Builds the final output.
    fn get_replication_output(
        &self,
        performance_metrics: Option<PerformanceMetrics>,
    ) -> anyhow::Result<ReplicationOutput>;
}

/// Emits state for streams that would otherwise finish without any.
pub trait MissingStateInjector: Send + Sync + Debug {
    /// Observes one source message.
    fn track_message(&self, message: &SyncMessage);

    /// Returns the state messages to emit after a clean source exit.
    fn get_states_to_inject(&self) -> Vec<SyncMessage>;
}
