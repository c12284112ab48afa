//! The result of a replication attempt.

use crate::message::{StateMessage, StreamKey};
use crate::observability::PerformanceMetrics;
use crate::state::Failure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal status of a replication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStatus {
    /// Every task finished cleanly.
    Completed,
    /// At least one task failed.
    Failed,
    /// The attempt was cancelled.
    Cancelled,
}

impl fmt::Display for ReplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Record and byte counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Records read from the source.
    pub records_emitted: u64,
    /// Record bytes read from the source.
    pub bytes_emitted: u64,
    /// Records the destination committed.
    pub records_committed: u64,
    /// Record bytes the destination committed.
    pub bytes_committed: u64,
    /// State messages read from the source.
    pub source_state_messages_emitted: u64,
    /// State messages acknowledged by the destination.
    pub destination_state_messages_emitted: u64,
}

/// Stats for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSyncStats {
    /// The stream.
    pub stream: StreamKey,
    /// Its counts.
    pub stats: SyncStats,
}

/// Final, immutable summary of a replication attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationOutput {
    /// Terminal status.
    pub status: ReplicationStatus,
    /// Totals across every stream.
    pub total_stats: SyncStats,
    /// Per-stream stats, ordered by stream.
    pub stream_stats: Vec<StreamSyncStats>,
    /// Connector-reported failures first, then run failures, in order.
    pub failures: Vec<Failure>,
    /// Last state the destination committed per scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Vec<StateMessage>>,
    /// Per-phase timings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_metrics: Option<PerformanceMetrics>,
    /// When the replication started.
    pub start_time: DateTime<Utc>,
    /// When the output was built.
    pub end_time: DateTime<Utc>,
}

impl ReplicationOutput {
    /// Returns true if the attempt completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == ReplicationStatus::Completed
    }

    /// Returns the stats of one stream.
    #[must_use]
    pub fn stream(&self, stream: &StreamKey) -> Option<&SyncStats> {
        self.stream_stats
            .iter()
            .find(|s| &s.stream == stream)
            .map(|s| &s.stats)
    }
}
