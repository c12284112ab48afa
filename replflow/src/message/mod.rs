//! Protocol messages exchanged with connectors.
//!
//! This module provides:
//! - SyncMessage, the tagged union of RECORD/STATE/TRACE/LOG/CONTROL
//! - StreamKey for identifying logical streams
//! - The configured catalog of streams and their schemas

mod catalog;
mod stream;
mod types;

pub use catalog::{ConfiguredCatalog, ConfiguredStream};
pub use stream::StreamKey;
pub use types::{
    AnalyticsTrace, ControlMessage, ErrorTrace, LogLevel, LogMessage, MessageKind, RecordMessage,
    StateMessage, StreamStatus, StreamStatusTrace, SyncMessage, TraceFailureType, TraceMessage,
    TracePayload,
};

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_record_wire_shape() {
        let msg = SyncMessage::Record(RecordMessage {
            stream: StreamKey::new("users"),
            data: json!({"id": 1}),
            emitted_at: 42,
        });

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "RECORD",
                "stream": {"name": "users"},
                "data": {"id": 1},
                "emitted_at": 42
            })
        );
    }

    #[test]
    fn test_stream_status_trace_parses() {
        let raw = json!({
            "type": "TRACE",
            "emitted_at": 7,
            "payload": {
                "trace_type": "STREAM_STATUS",
                "stream": {"name": "orders", "namespace": "shop"},
                "status": "COMPLETE"
            }
        });

        let msg: SyncMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.kind(), MessageKind::Trace);
        assert_eq!(
            msg.stream(),
            Some(&StreamKey::new("orders").with_namespace("shop"))
        );
    }

    #[test]
    fn test_kind_of_each_variant() {
        let stream = StreamKey::new("s");
        assert_eq!(SyncMessage::record(stream.clone(), json!({})).kind(), MessageKind::Record);
        assert_eq!(SyncMessage::stream_state(stream, json!({})).kind(), MessageKind::State);
        assert_eq!(SyncMessage::error_trace("boom", None).kind(), MessageKind::Trace);
        assert_eq!(SyncMessage::log(LogLevel::Info, "hi").kind(), MessageKind::Log);
    }

    #[test]
    fn test_catalog_schemas() {
        let catalog = ConfiguredCatalog::default()
            .with_stream(StreamKey::new("a"), json!({"type": "object"}))
            .with_stream(StreamKey::new("b"), json!({}));

        let keys: Vec<_> = catalog.stream_keys().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(catalog.schemas().len(), 2);
    }
}
