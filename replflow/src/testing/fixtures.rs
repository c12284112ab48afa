//! Message, catalog and input fixtures.

use crate::message::{ConfiguredCatalog, RecordMessage, StreamKey, SyncMessage};
use crate::worker::{ReplicationContext, ReplicationInput};
use serde_json::json;

/// Fixed emission time so fixtures compare equal.
pub const EMITTED_AT: i64 = 1_700_000_000_000;

/// Returns a namespace-less stream key.
#[must_use]
pub fn stream(name: &str) -> StreamKey {
    StreamKey::new(name)
}

/// Returns a record `{"id": id}` for `stream_name`.
#[must_use]
pub fn record(stream_name: &str, id: i64) -> SyncMessage {
    SyncMessage::Record(RecordMessage {
        stream: stream(stream_name),
        data: json!({ "id": id }),
        emitted_at: EMITTED_AT,
    })
}

/// Returns a state `{"cursor": cursor}` for `stream_name`.
#[must_use]
pub fn stream_state(stream_name: &str, cursor: i64) -> SyncMessage {
    SyncMessage::stream_state(stream(stream_name), json!({ "cursor": cursor }))
}

/// Returns the schema every fixture stream uses: an object with an integer `id`.
#[must_use]
pub fn id_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": { "id": { "type": "integer" } }
    })
}

/// Returns a catalog of the named streams.
#[must_use]
pub fn catalog(streams: &[&str]) -> ConfiguredCatalog {
    streams
        .iter()
        .fold(ConfiguredCatalog::default(), |catalog, name| {
            catalog.with_stream(stream(name), id_schema())
        })
}

/// Returns an input for job 1, attempt 0, workload `workload-1`.
#[must_use]
pub fn replication_input(catalog: ConfiguredCatalog) -> ReplicationInput {
    ReplicationInput::new(
        ReplicationContext::new(1, 0).with_workload_id("workload-1"),
        catalog,
    )
}
