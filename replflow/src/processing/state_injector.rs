//! Synthesizes state for streams that finished without checkpointing.

use super::MissingStateInjector;
use crate::message::{ConfiguredCatalog, StreamKey, SyncMessage};
use parking_lot::Mutex;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
struct Observed {
    streams: BTreeSet<StreamKey>,
    with_state: BTreeSet<StreamKey>,
    global_state: bool,
}

/// A [`MissingStateInjector`] that emits an empty state for every stream
/// that produced records, or was configured, but never produced a state.
///
/// A global state covers every stream, so once one is seen nothing is injected.
#[derive(Debug, Default)]
pub struct StreamStateInjector {
    observed: Mutex<Observed>,
}

impl StreamStateInjector {
    /// Creates an injector with no known streams.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an injector that expects every catalog stream.
    #[must_use]
    pub fn for_catalog(catalog: &ConfiguredCatalog) -> Self {
        let injector = Self::new();
        injector
            .observed
            .lock()
            .streams
            .extend(catalog.stream_keys().cloned());
        injector
    }
}

impl MissingStateInjector for StreamStateInjector {
    fn track_message(&self, message: &SyncMessage) {
        let mut observed = self.observed.lock();
        match message {
            SyncMessage::Record(record) => {
                observed.streams.insert(record.stream.clone());
            }
            SyncMessage::State(state) => match &state.stream {
                Some(stream) => {
                    observed.with_state.insert(stream.clone());
                }
                None => observed.global_state = true,
            },
            SyncMessage::Trace(_) | SyncMessage::Log(_) | SyncMessage::Control(_) => {}
        }
    }

    fn get_states_to_inject(&self) -> Vec<SyncMessage> {
        let observed = self.observed.lock();
        if observed.global_state {
            return Vec::new();
        }
        observed
            .streams
            .difference(&observed.with_state)
            .map(|stream| SyncMessage::stream_state(stream.clone(), serde_json::json!({})))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_injects_for_streams_without_state() {
        let injector = StreamStateInjector::for_catalog(
            &ConfiguredCatalog::default().with_stream(StreamKey::new("c"), json!({})),
        );
        injector.track_message(&SyncMessage::record(StreamKey::new("a"), json!({})));
        injector.track_message(&SyncMessage::record(StreamKey::new("b"), json!({})));
        injector.track_message(&SyncMessage::stream_state(StreamKey::new("b"), json!({"c": 1})));

        let injected: Vec<_> = injector
            .get_states_to_inject()
            .iter()
            .filter_map(|m| m.stream().map(ToString::to_string))
            .collect();
        assert_eq!(injected, vec!["a", "c"]);
    }

    #[test]
    fn test_global_state_suppresses_injection() {
        let injector = StreamStateInjector::new();
        injector.track_message(&SyncMessage::record(StreamKey::new("a"), json!({})));
        injector.track_message(&SyncMessage::global_state(json!({"cursor": 9})));

        assert!(injector.get_states_to_inject().is_empty());
    }
}
