//! Configured catalog: the streams a sync moves and their schemas.

use super::StreamKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One stream selected for replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredStream {
    /// The stream identity.
    pub stream: StreamKey,
    /// JSON Schema describing the stream's records.
    #[serde(default)]
    pub json_schema: serde_json::Value,
}

impl ConfiguredStream {
    /// Creates a configured stream.
    #[must_use]
    pub fn new(stream: StreamKey, json_schema: serde_json::Value) -> Self {
        Self {
            stream,
            json_schema,
        }
    }
}

/// The set of streams configured for a sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredCatalog {
    /// Configured streams, in catalog order.
    #[serde(default)]
    pub streams: Vec<ConfiguredStream>,
}

impl ConfiguredCatalog {
    /// Creates a catalog from configured streams.
    #[must_use]
    pub fn new(streams: Vec<ConfiguredStream>) -> Self {
        Self { streams }
    }

    /// Adds a stream.
    #[must_use]
    pub fn with_stream(mut self, stream: StreamKey, json_schema: serde_json::Value) -> Self {
        self.streams.push(ConfiguredStream::new(stream, json_schema));
        self
    }

    /// Returns the stream keys in catalog order.
    pub fn stream_keys(&self) -> impl Iterator<Item = &StreamKey> {
        self.streams.iter().map(|s| &s.stream)
    }

    /// Returns a stream-to-schema map.
    #[must_use]
    pub fn schemas(&self) -> HashMap<StreamKey, serde_json::Value> {
        self.streams
            .iter()
            .map(|s| (s.stream.clone(), s.json_schema.clone()))
            .collect()
    }

    /// Returns true if the catalog contains no streams.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
