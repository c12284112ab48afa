//! Completion tracking for source stream statuses.

use crate::message::{ConfiguredCatalog, StreamKey, StreamStatus, StreamStatusTrace, SyncMessage};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Remembers which streams the source reported complete.
///
/// `finalize` turns that knowledge into `COMPLETE` status traces for the
/// destination, but only for a source that exited cleanly.
#[derive(Debug, Default)]
pub struct StreamStatusCompletionTracker {
    streams: Mutex<BTreeMap<StreamKey, bool>>,
}

impl StreamStatusCompletionTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking every stream of the catalog as not yet complete.
    pub fn start_tracking(&self, catalog: &ConfiguredCatalog) {
        let mut streams = self.streams.lock();
        streams.clear();
        for key in catalog.stream_keys() {
            streams.insert(key.clone(), false);
        }
    }

    /// Records a stream status reported by the source.
    pub fn track(&self, status: &StreamStatusTrace) {
        if status.status == StreamStatus::Complete {
            self.streams.lock().insert(status.stream.clone(), true);
        }
    }

    /// Returns the `COMPLETE` traces to send, or nothing unless `exit_code` is 0.
    #[must_use]
    pub fn finalize(&self, exit_code: i32) -> Vec<SyncMessage> {
        if exit_code != 0 {
            return Vec::new();
        }
        self.streams
            .lock()
            .iter()
            .filter(|(_, complete)| **complete)
            .map(|(stream, _)| SyncMessage::stream_status(stream.clone(), StreamStatus::Complete))
            .collect()
    }
}
