//! The default message processor.

use super::{MessageProcessor, StreamStatusCompletionTracker, SyncStatsTracker};
use crate::config::ReplicationConfig;
use crate::connectors::SyncPersistence;
use crate::message::{LogLevel, StateMessage, StreamKey, SyncMessage, TracePayload};
use crate::observability::PerformanceMetrics;
use crate::state::{Failure, FailureOrigin, RunState};
use crate::validation::RecordSchemaValidator;
use crate::worker::{ReplicationContext, ReplicationInput, ReplicationOutput, ReplicationStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Number of source messages between progress log lines.
pub const PROGRESS_LOG_INTERVAL: u64 = 5000;

/// Tracks stats, stream statuses, connector errors and committed state.
///
/// The output status is derived from the shared [`RunState`]: cancelled
/// wins over failed, which wins over completed.
pub struct ReplicationHelper {
    run_state: Arc<RunState>,
    persistence: Arc<dyn SyncPersistence>,
    validator: Option<Arc<RecordSchemaValidator>>,
    stats: SyncStatsTracker,
    stream_status: StreamStatusCompletionTracker,
    context: RwLock<Option<ReplicationContext>>,
    trace_failures: Mutex<Vec<Failure>>,
    committed_states: Mutex<BTreeMap<Option<StreamKey>, StateMessage>>,
    records_read: AtomicU64,
    started_at: RwLock<Option<DateTime<Utc>>>,
}

impl fmt::Debug for ReplicationHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationHelper")
            .field("context", &*self.context.read())
            .field("validator", &self.validator.is_some())
            .field("records_read", &self.records_read.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ReplicationHelper {
    /// Creates a helper reporting into `run_state` and persisting into `persistence`.
    #[must_use]
    pub fn new(run_state: Arc<RunState>, persistence: Arc<dyn SyncPersistence>) -> Self {
        Self {
            run_state,
            persistence,
            validator: None,
            stats: SyncStatsTracker::new(),
            stream_status: StreamStatusCompletionTracker::new(),
            context: RwLock::new(None),
            trace_failures: Mutex::new(Vec::new()),
            committed_states: Mutex::new(BTreeMap::new()),
            records_read: AtomicU64::new(0),
            started_at: RwLock::new(None),
        }
    }

    /// Submits every source record to `validator`.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<RecordSchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Applies the tracker limits from `config`.
    #[must_use]
    pub fn with_config(mut self, config: &ReplicationConfig) -> Self {
        self.stats = SyncStatsTracker::with_memory_limit(config.state_tracker_memory_limit_bytes);
        self
    }

    /// Returns the stats tracker.
    #[must_use]
    pub fn stats(&self) -> &SyncStatsTracker {
        &self.stats
    }

    fn connection_context(&self) -> anyhow::Result<ReplicationContext> {
        self.context
            .read()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("replication helper used before initialize"))
    }

    fn track_error_trace(&self, origin: FailureOrigin, message: &SyncMessage) {
        let SyncMessage::Trace(trace) = message else {
            return;
        };
        let TracePayload::Error(error_trace) = &trace.payload else {
            return;
        };
        warn!(
            origin = %origin,
            message = %error_trace.message,
            "Connector reported an error"
        );
        let mut failures = self.trace_failures.lock();
        if failures.iter().all(|f| f.origin != origin) {
            failures.push(Failure::from_trace(origin, error_trace));
        }
    }
}

fn forward_log(origin: &str, message: &SyncMessage) {
    let SyncMessage::Log(log) = message else {
        return;
    };
    match log.level {
        LogLevel::Trace => trace!(origin, "{}", log.message),
        LogLevel::Debug => debug!(origin, "{}", log.message),
        LogLevel::Info => info!(origin, "{}", log.message),
        LogLevel::Warn => warn!(origin, "{}", log.message),
        LogLevel::Error | LogLevel::Fatal => error!(origin, "{}", log.message),
    }
}

#[async_trait]
impl MessageProcessor for ReplicationHelper {
    fn initialize(&self, input: &ReplicationInput, job_root: &Path) -> anyhow::Result<()> {
        if !job_root.is_dir() {
            anyhow::bail!("job root {} is not a directory", job_root.display());
        }
        info!(
            job_id = input.context.job_id,
            attempt = input.context.attempt,
            streams = input.catalog.streams.len(),
            job_root = %job_root.display(),
            "Initializing replication"
        );
        self.stream_status.start_tracking(&input.catalog);
        *self.context.write() = Some(input.context.clone());
        *self.started_at.write() = Some(Utc::now());
        Ok(())
    }

    async fn internal_process_message_from_source(
        &self,
        message: SyncMessage,
    ) -> anyhow::Result<SyncMessage> {
        self.stats.accept_from_source(&message);

        match &message {
            SyncMessage::Record(record) => {
                if let Some(validator) = &self.validator {
                    validator.submit(&record.stream, &record.data);
                }
            }
            SyncMessage::Trace(trace) => match &trace.payload {
                TracePayload::StreamStatus(status) => self.stream_status.track(status),
                TracePayload::Error(_) => self.track_error_trace(FailureOrigin::Source, &message),
                TracePayload::Analytics(analytics) => {
                    debug!(event = %analytics.event_type, "Source analytics event");
                }
            },
            SyncMessage::Log(_) => forward_log("source", &message),
            SyncMessage::Control(_) => info!("Source requested a connector config update"),
            SyncMessage::State(_) => {}
        }

        let read = self.records_read.fetch_add(1, Ordering::Relaxed) + 1;
        if read % PROGRESS_LOG_INTERVAL == 0 {
            info!(
                records_read = read,
                bytes = self.stats.total_bytes_emitted(),
                "Records read"
            );
        }

        Ok(message)
    }

    async fn internal_process_message_from_destination(
        &self,
        message: SyncMessage,
    ) -> anyhow::Result<()> {
        self.stats.accept_from_destination(&message);

        match &message {
            SyncMessage::State(state) => {
                let context = self.connection_context()?;
                self.persistence
                    .persist(context.connection_id, state)
                    .await?;
                self.committed_states
                    .lock()
                    .insert(state.stream.clone(), state.clone());
            }
            SyncMessage::Trace(_) => self.track_error_trace(FailureOrigin::Destination, &message),
            SyncMessage::Log(_) => forward_log("destination", &message),
            SyncMessage::Control(_) => info!("Destination requested a connector config update"),
            SyncMessage::Record(_) => {
                debug!("Ignoring record emitted by destination");
            }
        }
        Ok(())
    }

    fn get_stream_status_to_send(&self, exit_code: i32) -> Vec<SyncMessage> {
        self.stream_status.finalize(exit_code)
    }

    fn end_of_source(&self) {
        info!(
            records_read = self.records_read.load(Ordering::Relaxed),
            bytes = self.stats.total_bytes_emitted(),
            "Total records read"
        );
    }

    fn end_of_destination(&self) {
        info!(
            committed_states = self.committed_states.lock().len(),
            "Destination finished writing"
        );
    }

    fn end_of_replication(&self) {
        if let Some(validator) = &self.validator {
            for (stream, errors) in validator.errors() {
                warn!(stream = %stream, errors = errors.count, "Records failed schema validation");
            }
        }
        info!(cancelled = self.run_state.is_cancelled(), "Replication finished");
    }

    fn get_replication_output(
        &self,
        performance_metrics: Option<PerformanceMetrics>,
    ) -> anyhow::Result<ReplicationOutput> {
        let start_time = self
            .started_at
            .read()
            .ok_or_else(|| anyhow::anyhow!("replication output requested before initialize"))?;

        let status = if self.run_state.is_cancelled() {
            ReplicationStatus::Cancelled
        } else if self.run_state.has_failed() {
            ReplicationStatus::Failed
        } else {
            ReplicationStatus::Completed
        };
        let completed = status == ReplicationStatus::Completed;
        if !completed && self.stats.has_unreliable_commits() {
            warn!("Could not reliably determine committed record counts");
        }

        let mut failures = self.trace_failures.lock().clone();
        failures.extend(self.run_state.failures());

        let states: Vec<StateMessage> = self.committed_states.lock().values().cloned().collect();

        let output = ReplicationOutput {
            status,
            total_stats: self.stats.total_stats(completed),
            stream_stats: self.stats.stream_stats(completed),
            failures,
            state: (!states.is_empty()).then_some(states),
            performance_metrics,
            start_time,
            end_time: Utc::now(),
        };

        info!(
            status = %output.status,
            records = output.total_stats.records_emitted,
            committed = output.total_stats.records_committed,
            failures = output.failures.len(),
            "Sync summary"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::InMemorySyncPersistence;
    use crate::errors::ReplicationError;
    use crate::message::{ConfiguredCatalog, StreamStatus, TraceFailureType};
    use crate::worker::ReplicationContext;
    use serde_json::json;

    fn users() -> StreamKey {
        StreamKey::new("users")
    }

    fn input() -> ReplicationInput {
        ReplicationInput::new(
            ReplicationContext::new(1, 0),
            ConfiguredCatalog::default().with_stream(users(), json!({"type": "object"})),
        )
    }

    fn helper() -> (ReplicationHelper, Arc<RunState>, Arc<InMemorySyncPersistence>) {
        let run_state = Arc::new(RunState::new());
        let persistence = Arc::new(InMemorySyncPersistence::new());
        let helper = ReplicationHelper::new(run_state.clone(), persistence.clone());
        (helper, run_state, persistence)
    }

    #[tokio::test]
    async fn test_output_requires_initialize() {
        let (helper, _, _) = helper();
        assert!(helper.get_replication_output(None).is_err());
    }

    #[tokio::test]
    async fn test_completed_output() {
        let (helper, _, _) = helper();
        let dir = tempfile::tempdir().unwrap();
        helper.initialize(&input(), dir.path()).unwrap();

        helper
            .process_message_from_source(SyncMessage::record(users(), json!({"id": 1})))
            .await
            .unwrap();

        let output = helper.get_replication_output(None).unwrap();
        assert_eq!(output.status, ReplicationStatus::Completed);
        assert_eq!(output.total_stats.records_emitted, 1);
        assert_eq!(output.total_stats.records_committed, 1);
        assert!(output.failures.is_empty());
    }

    #[tokio::test]
    async fn test_config_limits_pending_states() {
        let (helper, _, _) = helper();
        let helper =
            helper.with_config(&ReplicationConfig::default().with_state_tracker_memory_limit(0));
        let dir = tempfile::tempdir().unwrap();
        helper.initialize(&input(), dir.path()).unwrap();

        helper
            .process_message_from_source(SyncMessage::record(users(), json!({"id": 1})))
            .await
            .unwrap();
        helper
            .process_message_from_source(SyncMessage::stream_state(users(), json!({"cursor": 1})))
            .await
            .unwrap();

        assert!(helper.stats().has_unreliable_commits());
        assert_eq!(helper.stats().pending_state_count(), 0);
    }

    #[tokio::test]
    async fn test_status_precedence() {
        let (helper, run_state, _) = helper();
        let dir = tempfile::tempdir().unwrap();
        helper.initialize(&input(), dir.path()).unwrap();

        run_state.mark_failed();
        assert_eq!(
            helper.get_replication_output(None).unwrap().status,
            ReplicationStatus::Failed
        );

        run_state.mark_cancelled();
        assert_eq!(
            helper.get_replication_output(None).unwrap().status,
            ReplicationStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_destination_state_is_persisted() {
        let (helper, _, persistence) = helper();
        let dir = tempfile::tempdir().unwrap();
        helper.initialize(&input(), dir.path()).unwrap();

        let state = SyncMessage::stream_state(users(), json!({"cursor": 5}));
        helper.process_message_from_source(state.clone()).await.unwrap();
        helper.process_message_from_destination(state).await.unwrap();

        assert_eq!(persistence.states().len(), 1);
        let output = helper.get_replication_output(None).unwrap();
        assert_eq!(output.state.map(|s| s.len()), Some(1));
        assert_eq!(output.total_stats.destination_state_messages_emitted, 1);
    }

    #[tokio::test]
    async fn test_error_traces_come_first_once_per_origin() {
        let (helper, run_state, _) = helper();
        let dir = tempfile::tempdir().unwrap();
        helper.initialize(&input(), dir.path()).unwrap();

        run_state.track_failure(&ReplicationError::source("Source process read attempt failed"));
        for msg in ["first", "second"] {
            helper
                .process_message_from_source(SyncMessage::error_trace(
                    msg,
                    Some(TraceFailureType::ConfigError),
                ))
                .await
                .unwrap();
        }
        helper
            .process_message_from_destination(SyncMessage::error_trace("dest", None))
            .await
            .unwrap();

        let output = helper.get_replication_output(None).unwrap();
        let origins: Vec<_> = output.failures.iter().map(|f| f.origin).collect();
        assert_eq!(
            origins,
            vec![
                FailureOrigin::Source,
                FailureOrigin::Destination,
                FailureOrigin::Source
            ]
        );
        assert_eq!(output.failures[0].external_message.as_deref(), Some("first"));
        assert!(output.failures[0].from_trace_message);
        assert!(!output.failures[2].from_trace_message);
    }

    #[tokio::test]
    async fn test_stream_status_tracked_from_source() {
        let (helper, _, _) = helper();
        let dir = tempfile::tempdir().unwrap();
        helper.initialize(&input(), dir.path()).unwrap();

        helper
            .process_message_from_source(SyncMessage::stream_status(users(), StreamStatus::Complete))
            .await
            .unwrap();

        assert_eq!(helper.get_stream_status_to_send(0).len(), 1);
        assert!(helper.get_stream_status_to_send(1).is_empty());
    }

    #[tokio::test]
    async fn test_initialize_rejects_missing_job_root() {
        let (helper, _, _) = helper();
        let missing = Path::new("/definitely/not/a/job/root");
        assert!(helper.initialize(&input(), missing).is_err());
    }
}
