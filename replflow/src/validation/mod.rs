//! Off-path JSON Schema validation of source records.
//!
//! Records are handed to a background worker over a bounded channel so a
//! slow schema never stalls the read loop. When the channel is full the
//! record is skipped and counted, never waited on.

use crate::message::StreamKey;
use anyhow::Context;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Keys whose values map property names to schemas.
const PROPERTY_MAPS: &[&str] = &["properties", "patternProperties", "definitions", "$defs"];

/// Keys whose values are instance data, not schemas.
const DATA_KEYWORDS: &[&str] = &["enum", "const", "default", "examples"];

/// Validation errors accumulated for one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamValidationErrors {
    /// Distinct error messages. In counting mode only the first message of
    /// each schema location is kept.
    pub messages: BTreeSet<String>,
    /// Occurrences per schema location (counting mode only).
    pub occurrences: BTreeMap<String, u64>,
    /// Total number of errors observed.
    pub count: u64,
}

struct ValidationJob {
    stream: StreamKey,
    record: serde_json::Value,
}

struct Shared {
    validators: HashMap<StreamKey, jsonschema::Validator>,
    errors: DashMap<StreamKey, StreamValidationErrors>,
    counting: bool,
}

impl Shared {
    fn validate(&self, stream: &StreamKey, record: &serde_json::Value) -> Vec<(String, String)> {
        let Some(validator) = self.validators.get(stream) else {
            return Vec::new();
        };
        validator
            .iter_errors(record)
            .map(|e| (e.schema_path.to_string(), e.to_string()))
            .collect()
    }

    fn record(&self, stream: StreamKey, errors: Vec<(String, String)>) {
        if errors.is_empty() {
            return;
        }
        let mut entry = self.errors.entry(stream).or_default();
        for (schema_path, message) in errors {
            entry.count += 1;
            if self.counting {
                let first = {
                    let seen = entry.occurrences.entry(schema_path).or_insert(0);
                    *seen += 1;
                    *seen == 1
                };
                if first {
                    entry.messages.insert(message);
                }
            } else {
                entry.messages.insert(message);
            }
        }
    }
}

/// Validates records against the per-stream schemas of a catalog.
pub struct RecordSchemaValidator {
    shared: Arc<Shared>,
    tx: Mutex<Option<mpsc::Sender<ValidationJob>>>,
    rx: Mutex<Option<mpsc::Receiver<ValidationJob>>>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    submitted: AtomicU64,
    dropped: AtomicU64,
    shutdown_timeout: Duration,
}

impl fmt::Debug for RecordSchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordSchemaValidator")
            .field("streams", &self.shared.validators.len())
            .field("counting", &self.shared.counting)
            .field("submitted", &self.submitted.load(Ordering::Relaxed))
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RecordSchemaValidator {
    /// Compiles one validator per stream.
    ///
    /// Returns an error naming the stream whose schema does not compile.
    pub fn new(
        schemas: HashMap<StreamKey, serde_json::Value>,
        queue_size: usize,
    ) -> anyhow::Result<Self> {
        Self::build(schemas, queue_size, false)
    }

    /// Like [`new`](Self::new), but stores only the first message of each
    /// distinct schema violation and counts the rest.
    pub fn counting(
        schemas: HashMap<StreamKey, serde_json::Value>,
        queue_size: usize,
    ) -> anyhow::Result<Self> {
        Self::build(schemas, queue_size, true)
    }

    fn build(
        schemas: HashMap<StreamKey, serde_json::Value>,
        queue_size: usize,
        counting: bool,
    ) -> anyhow::Result<Self> {
        let mut validators = HashMap::with_capacity(schemas.len());
        for (stream, schema) in schemas {
            let schema = normalize_schema(&schema);
            let validator = jsonschema::validator_for(&schema)
                .map_err(|e| anyhow::anyhow!("{e}"))
                .with_context(|| format!("Invalid JSON Schema for stream '{stream}'"))?;
            validators.insert(stream, validator);
        }

        let (tx, rx) = mpsc::channel(queue_size.max(1));
        Ok(Self {
            shared: Arc::new(Shared {
                validators,
                errors: DashMap::new(),
                counting,
            }),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            worker_handle: Mutex::new(None),
            submitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            shutdown_timeout: Duration::from_secs(10),
        })
    }

    /// Sets how long `close` waits for pending validations.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Starts the background worker. Calling it again is a no-op.
    pub fn start(&self) {
        let Some(mut rx) = self.rx.lock().take() else {
            return;
        };
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let errors = shared.validate(&job.stream, &job.record);
                shared.record(job.stream, errors);
            }
            debug!("Schema validation worker drained");
        });
        *self.worker_handle.lock() = Some(handle);
    }

    /// Queues a record for validation without waiting.
    ///
    /// Records for streams without a schema are ignored.
    pub fn submit(&self, stream: &StreamKey, record: &serde_json::Value) {
        if !self.shared.validators.contains_key(stream) {
            return;
        }
        let tx = self.tx.lock().clone();
        let Some(tx) = tx else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let job = ValidationJob {
            stream: stream.clone(),
            record: record.clone(),
        };
        match tx.try_send(job) {
            Ok(()) => {
                self.submitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!(
                        stream = %stream,
                        dropped_total = dropped,
                        "Schema validation skipped due to backpressure"
                    );
                }
            }
        }
    }

    /// Validates a record on the calling task.
    pub fn validate_now(
        &self,
        stream: &StreamKey,
        record: &serde_json::Value,
    ) -> Result<(), Vec<String>> {
        let errors = self.shared.validate(stream, record);
        if errors.is_empty() {
            return Ok(());
        }
        let messages = errors.iter().map(|(_, m)| m.clone()).collect();
        self.shared.record(stream.clone(), errors);
        Err(messages)
    }

    /// Stops accepting records and waits for the worker to drain.
    ///
    /// Pending validations are abandoned once the shutdown timeout elapses.
    pub async fn close(&self) -> anyhow::Result<()> {
        self.tx.lock().take();
        self.rx.lock().take();
        let handle = self.worker_handle.lock().take();

        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                Ok(joined) => joined.context("schema validation worker panicked")?,
                Err(_) => {
                    warn!(
                        timeout_secs = self.shutdown_timeout.as_secs(),
                        "Schema validation did not drain in time, abandoning pending records"
                    );
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }

        for entry in &self.shared.errors {
            info!(
                stream = %entry.key(),
                errors = entry.count,
                "Schema validation errors found"
            );
        }
        Ok(())
    }

    /// Returns true once `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Returns a snapshot of the accumulated errors.
    #[must_use]
    pub fn errors(&self) -> BTreeMap<StreamKey, StreamValidationErrors> {
        self.shared
            .errors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Returns true if any stream has validation errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.shared.errors.is_empty()
    }

    /// Returns the number of records accepted for background validation.
    #[must_use]
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Returns the number of records skipped because the queue was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Removes legacy string `id` keywords from schema nodes.
///
/// Property names are never touched, so a property called `id` survives.
#[must_use]
pub fn normalize_schema(schema: &serde_json::Value) -> serde_json::Value {
    let mut schema = schema.clone();
    normalize_node(&mut schema, false);
    schema
}

fn normalize_node(node: &mut serde_json::Value, is_property_map: bool) {
    match node {
        serde_json::Value::Object(map) => {
            if !is_property_map && map.get("id").is_some_and(serde_json::Value::is_string) {
                map.remove("id");
            }
            for (key, child) in map.iter_mut() {
                if is_property_map {
                    normalize_node(child, false);
                } else if DATA_KEYWORDS.contains(&key.as_str()) {
                    continue;
                } else {
                    normalize_node(child, PROPERTY_MAPS.contains(&key.as_str()));
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                normalize_node(item, false);
            }
        }
        _ => {}
    }
}
