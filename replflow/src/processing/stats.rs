//! Emitted and committed record counts per stream.

use crate::message::{StateMessage, StreamKey, SyncMessage};
use crate::worker::{StreamSyncStats, SyncStats};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::mem;
use tracing::warn;

/// Default budget for states awaiting a destination acknowledgement.
pub const DEFAULT_STATE_TRACKER_MEMORY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

/// Returns the hex SHA-256 of a state message's canonical JSON.
#[must_use]
pub fn state_checksum(state: &StateMessage) -> String {
    let bytes = serde_json::to_vec(state).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

#[derive(Debug)]
struct PendingState {
    checksum: String,
    deltas: Vec<(StreamKey, u64, u64)>,
}

impl PendingState {
    fn estimated_bytes(&self) -> usize {
        let deltas: usize = self
            .deltas
            .iter()
            .map(|(stream, _, _)| {
                mem::size_of::<(StreamKey, u64, u64)>()
                    + stream.name.len()
                    + stream.namespace.as_ref().map_or(0, String::len)
            })
            .sum();
        mem::size_of::<Self>() + self.checksum.len() + deltas
    }
}

#[derive(Debug, Default)]
struct Inner {
    streams: BTreeMap<StreamKey, SyncStats>,
    since_last_state: BTreeMap<StreamKey, (u64, u64)>,
    pending: HashMap<Option<StreamKey>, VecDeque<PendingState>>,
    pending_bytes: usize,
    memory_limit: usize,
    source_states: u64,
    destination_states: u64,
    unreliable_commits: bool,
}

impl Inner {
    fn stream(&mut self, key: &StreamKey) -> &mut SyncStats {
        self.streams.entry(key.clone()).or_default()
    }

    /// Drops every pending delta; committed counts are no longer tracked.
    fn stop_tracking(&mut self) {
        self.unreliable_commits = true;
        self.pending.clear();
        self.since_last_state.clear();
        self.pending_bytes = 0;
    }
}

/// Tracks what the source emitted and what the destination committed.
///
/// Records counted after a source state are committed when the destination
/// acknowledges a state with the same checksum. Acknowledging a state commits
/// every earlier pending state of the same scope.
///
/// Pending states are held within a memory budget. Past it, or after an
/// acknowledgement that matches nothing, commits are marked unreliable and
/// tracking stops; emitted counts are still kept.
#[derive(Debug)]
pub struct SyncStatsTracker {
    inner: Mutex<Inner>,
}

impl Default for SyncStatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStatsTracker {
    /// Creates an empty tracker with the default memory budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_memory_limit(DEFAULT_STATE_TRACKER_MEMORY_LIMIT_BYTES)
    }

    /// Creates an empty tracker holding at most `bytes` of pending states.
    #[must_use]
    pub fn with_memory_limit(bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                memory_limit: bytes,
                ..Inner::default()
            }),
        }
    }

    /// Counts a message read from the source.
    pub fn accept_from_source(&self, message: &SyncMessage) {
        let mut inner = self.inner.lock();
        match message {
            SyncMessage::Record(record) => {
                let bytes = record.byte_size();
                let stats = inner.stream(&record.stream);
                stats.records_emitted += 1;
                stats.bytes_emitted += bytes;
                if inner.unreliable_commits {
                    return;
                }
                let since = inner
                    .since_last_state
                    .entry(record.stream.clone())
                    .or_default();
                since.0 += 1;
                since.1 += bytes;
            }
            SyncMessage::State(state) => {
                inner.source_states += 1;
                let deltas = match &state.stream {
                    Some(stream) => {
                        inner.stream(stream).source_state_messages_emitted += 1;
                        inner
                            .since_last_state
                            .remove(stream)
                            .map(|(records, bytes)| vec![(stream.clone(), records, bytes)])
                            .unwrap_or_default()
                    }
                    None => std::mem::take(&mut inner.since_last_state)
                        .into_iter()
                        .map(|(stream, (records, bytes))| (stream, records, bytes))
                        .collect(),
                };
                if inner.unreliable_commits {
                    return;
                }

                let pending = PendingState {
                    checksum: state_checksum(state),
                    deltas,
                };
                inner.pending_bytes += pending.estimated_bytes();
                if inner.pending_bytes > inner.memory_limit {
                    warn!(
                        limit_bytes = inner.memory_limit,
                        "Too many unacknowledged states; committed counts will not be tracked"
                    );
                    inner.stop_tracking();
                    return;
                }
                inner
                    .pending
                    .entry(state.stream.clone())
                    .or_default()
                    .push_back(pending);
            }
            SyncMessage::Trace(_) | SyncMessage::Log(_) | SyncMessage::Control(_) => {}
        }
    }

    /// Counts a message emitted by the destination.
    pub fn accept_from_destination(&self, message: &SyncMessage) {
        let SyncMessage::State(state) = message else {
            return;
        };
        let mut inner = self.inner.lock();
        inner.destination_states += 1;
        if let Some(stream) = &state.stream {
            inner.stream(stream).destination_state_messages_emitted += 1;
        }
        if inner.unreliable_commits {
            return;
        }

        let checksum = state_checksum(state);
        let committed: Vec<PendingState> = match inner.pending.get_mut(&state.stream) {
            Some(queue) => match queue.iter().position(|p| p.checksum == checksum) {
                Some(pos) => queue.drain(..=pos).collect(),
                None => Vec::new(),
            },
            None => Vec::new(),
        };

        if committed.is_empty() {
            warn!(
                stream = ?state.stream,
                "Destination acknowledged a state the source never emitted"
            );
            inner.stop_tracking();
            return;
        }

        inner.pending_bytes = inner
            .pending_bytes
            .saturating_sub(committed.iter().map(PendingState::estimated_bytes).sum());
        for (stream, records, bytes) in committed.into_iter().flat_map(|p| p.deltas) {
            let stats = inner.stream(&stream);
            stats.records_committed += records;
            stats.bytes_committed += bytes;
        }
    }

    /// Returns per-stream stats; a completed run commits everything emitted.
    #[must_use]
    pub fn stream_stats(&self, completed: bool) -> Vec<StreamSyncStats> {
        self.inner
            .lock()
            .streams
            .iter()
            .map(|(stream, stats)| StreamSyncStats {
                stream: stream.clone(),
                stats: finalize(stats.clone(), completed),
            })
            .collect()
    }

    /// Returns totals across streams; a completed run commits everything emitted.
    #[must_use]
    pub fn total_stats(&self, completed: bool) -> SyncStats {
        let inner = self.inner.lock();
        let mut total = inner
            .streams
            .values()
            .fold(SyncStats::default(), |mut acc, s| {
                acc.records_emitted += s.records_emitted;
                acc.bytes_emitted += s.bytes_emitted;
                acc.records_committed += s.records_committed;
                acc.bytes_committed += s.bytes_committed;
                acc
            });
        total.source_state_messages_emitted = inner.source_states;
        total.destination_state_messages_emitted = inner.destination_states;
        finalize(total, completed)
    }

    /// Returns the number of records read from the source.
    #[must_use]
    pub fn total_records_emitted(&self) -> u64 {
        self.inner.lock().streams.values().map(|s| s.records_emitted).sum()
    }

    /// Returns the number of record bytes read from the source.
    #[must_use]
    pub fn total_bytes_emitted(&self) -> u64 {
        self.inner.lock().streams.values().map(|s| s.bytes_emitted).sum()
    }

    /// Returns true if committed counts stopped being tracked.
    #[must_use]
    pub fn has_unreliable_commits(&self) -> bool {
        self.inner.lock().unreliable_commits
    }

    /// Returns the number of source states awaiting acknowledgement.
    #[must_use]
    pub fn pending_state_count(&self) -> usize {
        self.inner.lock().pending.values().map(VecDeque::len).sum()
    }
}

fn finalize(mut stats: SyncStats, completed: bool) -> SyncStats {
    if completed {
        stats.records_committed = stats.records_emitted;
        stats.bytes_committed = stats.bytes_emitted;
    }
    stats
}
