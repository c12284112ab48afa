//! Collaborator doubles for pipeline tests.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::connectors::{ConnectorConfig, Destination, Source};
use crate::message::SyncMessage;
use crate::observability::PerformanceMetrics;
use crate::processing::MessageProcessor;
use crate::state::RunState;
use crate::worker::{ReplicationInput, ReplicationOutput, ReplicationStatus, SyncStats};

fn fail_with(error: Option<&String>) -> anyhow::Result<()> {
    match error {
        Some(message) => Err(anyhow::anyhow!("{message}")),
        None => Ok(()),
    }
}

type ClosedCheck = Box<dyn Fn() -> bool + Send + Sync>;

#[derive(Default)]
struct CloseLogInner {
    entries: Vec<&'static str>,
    watched: Vec<(&'static str, ClosedCheck)>,
}

impl CloseLogInner {
    fn observe(&mut self) {
        let newly_closed: Vec<&'static str> = self
            .watched
            .iter()
            .filter(|(name, is_closed)| !self.entries.contains(name) && is_closed())
            .map(|(name, _)| *name)
            .collect();
        self.entries.extend(newly_closed);
    }
}

/// An ordered log of resource closes shared between doubles.
///
/// Doubles record themselves when closed. Watched resources are logged the
/// first time they are seen closed, just before the next recorded entry.
#[derive(Clone, Default)]
pub struct CloseLog {
    inner: Arc<Mutex<CloseLogInner>>,
}

impl CloseLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs `name` once `is_closed` first returns true.
    pub fn watch(&self, name: &'static str, is_closed: impl Fn() -> bool + Send + Sync + 'static) {
        self.inner.lock().watched.push((name, Box::new(is_closed)));
    }

    /// Appends `name` after any watched resource that has closed since.
    pub fn record(&self, name: &'static str) {
        let mut inner = self.inner.lock();
        inner.observe();
        inner.entries.push(name);
    }

    /// Returns the close order so far.
    #[must_use]
    pub fn entries(&self) -> Vec<&'static str> {
        let mut inner = self.inner.lock();
        inner.observe();
        inner.entries.clone()
    }
}

impl fmt::Debug for CloseLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseLog")
            .field("entries", &self.inner.lock().entries)
            .finish_non_exhaustive()
    }
}

/// A source that replays a fixed list of messages.
///
/// It is finished once the script is drained, unless it is endless, in
/// which case it reads nothing forever until cancelled.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    messages: Mutex<VecDeque<SyncMessage>>,
    endless: bool,
    exit_value: i32,
    start_error: Option<String>,
    read_error: Option<String>,
    close_error: Option<String>,
    close_log: Option<CloseLog>,
    cancelled: AtomicBool,
    start_count: AtomicUsize,
    cancel_count: AtomicUsize,
    close_count: AtomicUsize,
}

impl ScriptedSource {
    /// Creates a source that emits `messages` then exits with 0.
    #[must_use]
    pub fn new(messages: Vec<SyncMessage>) -> Self {
        Self {
            messages: Mutex::new(messages.into()),
            ..Self::default()
        }
    }

    /// Creates a source that never finishes on its own.
    #[must_use]
    pub fn endless() -> Self {
        Self {
            endless: true,
            ..Self::default()
        }
    }

    /// Sets the exit value reported after the script.
    #[must_use]
    pub fn with_exit_value(mut self, exit_value: i32) -> Self {
        self.exit_value = exit_value;
        self
    }

    /// Makes `start` fail.
    #[must_use]
    pub fn with_start_error(mut self, message: impl Into<String>) -> Self {
        self.start_error = Some(message.into());
        self
    }

    /// Makes every `attempt_read` fail.
    #[must_use]
    pub fn with_read_error(mut self, message: impl Into<String>) -> Self {
        self.read_error = Some(message.into());
        self
    }

    /// Makes `close` fail.
    #[must_use]
    pub fn with_close_error(mut self, message: impl Into<String>) -> Self {
        self.close_error = Some(message.into());
        self
    }

    /// Records `close` calls in `log`.
    #[must_use]
    pub fn with_close_log(mut self, log: CloseLog) -> Self {
        self.close_log = Some(log);
        self
    }

    /// Returns how many times `start` was called.
    #[must_use]
    pub fn start_count(&self) -> usize {
        self.start_count.load(Ordering::SeqCst)
    }

    /// Returns how many times `cancel` was called.
    #[must_use]
    pub fn cancel_count(&self) -> usize {
        self.cancel_count.load(Ordering::SeqCst)
    }

    /// Returns how many times `close` was called.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for ScriptedSource {
    async fn start(&self, _config: &ConnectorConfig, _job_root: &Path) -> anyhow::Result<()> {
        self.start_count.fetch_add(1, Ordering::SeqCst);
        fail_with(self.start_error.as_ref())
    }

    async fn attempt_read(&self) -> anyhow::Result<Option<SyncMessage>> {
        fail_with(self.read_error.as_ref())?;
        Ok(self.messages.lock().pop_front())
    }

    fn is_finished(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || (!self.endless && self.messages.lock().is_empty())
    }

    fn exit_value(&self) -> i32 {
        self.exit_value
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.close_log {
            log.record("source");
        }
        fail_with(self.close_error.as_ref())
    }

    async fn cancel(&self) -> anyhow::Result<()> {
        self.cancel_count.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A destination that records what it accepts.
///
/// It is finished once its input was closed and its scripted output is
/// drained. With state echo enabled, every accepted STATE is emitted back
/// as an acknowledgement.
#[derive(Debug, Default)]
pub struct RecordingDestination {
    accepted: Mutex<Vec<SyncMessage>>,
    output: Mutex<VecDeque<SyncMessage>>,
    echo_states: bool,
    exit_value: i32,
    start_error: Option<String>,
    accept_error: Option<String>,
    read_error: Option<String>,
    close_error: Option<String>,
    close_log: Option<CloseLog>,
    cancelled: AtomicBool,
    start_count: AtomicUsize,
    end_of_input_count: AtomicUsize,
    cancel_count: AtomicUsize,
    close_count: AtomicUsize,
}

impl RecordingDestination {
    /// Creates a destination that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits every accepted STATE back as an acknowledgement.
    #[must_use]
    pub fn with_state_echo(mut self) -> Self {
        self.echo_states = true;
        self
    }

    /// Scripts messages for `attempt_read`.
    #[must_use]
    pub fn with_output(self, messages: Vec<SyncMessage>) -> Self {
        self.output.lock().extend(messages);
        self
    }

    /// Sets the exit value.
    #[must_use]
    pub fn with_exit_value(mut self, exit_value: i32) -> Self {
        self.exit_value = exit_value;
        self
    }

    /// Makes `start` fail.
    #[must_use]
    pub fn with_start_error(mut self, message: impl Into<String>) -> Self {
        self.start_error = Some(message.into());
        self
    }

    /// Makes every `accept` fail.
    #[must_use]
    pub fn with_accept_error(mut self, message: impl Into<String>) -> Self {
        self.accept_error = Some(message.into());
        self
    }

    /// Makes every `attempt_read` fail.
    #[must_use]
    pub fn with_read_error(mut self, message: impl Into<String>) -> Self {
        self.read_error = Some(message.into());
        self
    }

    /// Makes `close` fail.
    #[must_use]
    pub fn with_close_error(mut self, message: impl Into<String>) -> Self {
        self.close_error = Some(message.into());
        self
    }

    /// Records `close` calls in `log`.
    #[must_use]
    pub fn with_close_log(mut self, log: CloseLog) -> Self {
        self.close_log = Some(log);
        self
    }

    /// Returns the accepted messages in order.
    #[must_use]
    pub fn accepted(&self) -> Vec<SyncMessage> {
        self.accepted.lock().clone()
    }

    /// Returns how many times `start` was called.
    #[must_use]
    pub fn start_count(&self) -> usize {
        self.start_count.load(Ordering::SeqCst)
    }

    /// Returns how many times `notify_end_of_input` was called.
    #[must_use]
    pub fn end_of_input_count(&self) -> usize {
        self.end_of_input_count.load(Ordering::SeqCst)
    }

    /// Returns how many times `cancel` was called.
    #[must_use]
    pub fn cancel_count(&self) -> usize {
        self.cancel_count.load(Ordering::SeqCst)
    }

    /// Returns how many times `close` was called.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Destination for RecordingDestination {
    async fn start(&self, _config: &ConnectorConfig, _job_root: &Path) -> anyhow::Result<()> {
        self.start_count.fetch_add(1, Ordering::SeqCst);
        fail_with(self.start_error.as_ref())
    }

    async fn accept(&self, message: SyncMessage) -> anyhow::Result<()> {
        fail_with(self.accept_error.as_ref())?;
        if self.echo_states && matches!(message, SyncMessage::State(_)) {
            self.output.lock().push_back(message.clone());
        }
        self.accepted.lock().push(message);
        Ok(())
    }

    async fn notify_end_of_input(&self) -> anyhow::Result<()> {
        self.end_of_input_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn attempt_read(&self) -> anyhow::Result<Option<SyncMessage>> {
        fail_with(self.read_error.as_ref())?;
        Ok(self.output.lock().pop_front())
    }

    fn is_finished(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || (self.end_of_input_count() > 0 && self.output.lock().is_empty())
    }

    fn exit_value(&self) -> i32 {
        self.exit_value
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.close_log {
            log.record("destination");
        }
        fail_with(self.close_error.as_ref())
    }

    async fn cancel(&self) -> anyhow::Result<()> {
        self.cancel_count.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A processor that passes messages through and records every call.
#[derive(Debug, Default)]
pub struct RecordingProcessor {
    calls: Mutex<Vec<String>>,
    destination_messages: Mutex<Vec<SyncMessage>>,
    stream_status_exit_codes: Mutex<Vec<i32>>,
    stream_statuses: Vec<SyncMessage>,
    run_state: Option<Arc<RunState>>,
    filter_source: bool,
    initialize_error: Option<String>,
    source_error: Option<String>,
    output_error: Option<String>,
}

impl RecordingProcessor {
    /// Creates a pass-through processor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the output status and failures from `run_state`.
    #[must_use]
    pub fn with_run_state(mut self, run_state: Arc<RunState>) -> Self {
        self.run_state = Some(run_state);
        self
    }

    /// Returns `statuses` from `get_stream_status_to_send`.
    #[must_use]
    pub fn with_stream_statuses(mut self, statuses: Vec<SyncMessage>) -> Self {
        self.stream_statuses = statuses;
        self
    }

    /// Swallows every source message.
    #[must_use]
    pub fn with_filtered_source_messages(mut self) -> Self {
        self.filter_source = true;
        self
    }

    /// Makes `initialize` fail.
    #[must_use]
    pub fn with_initialize_error(mut self, message: impl Into<String>) -> Self {
        self.initialize_error = Some(message.into());
        self
    }

    /// Makes source processing fail.
    #[must_use]
    pub fn with_source_error(mut self, message: impl Into<String>) -> Self {
        self.source_error = Some(message.into());
        self
    }

    /// Makes `get_replication_output` fail.
    #[must_use]
    pub fn with_output_error(mut self, message: impl Into<String>) -> Self {
        self.output_error = Some(message.into());
        self
    }

    fn record_call(&self, name: &str) {
        self.calls.lock().push(name.to_string());
    }

    /// Returns the recorded call names in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Returns true if `name` was called at least once.
    #[must_use]
    pub fn was_called(&self, name: &str) -> bool {
        self.calls.lock().iter().any(|c| c == name)
    }

    /// Returns the messages received from the destination.
    #[must_use]
    pub fn destination_messages(&self) -> Vec<SyncMessage> {
        self.destination_messages.lock().clone()
    }

    /// Returns the exit codes passed to `get_stream_status_to_send`.
    #[must_use]
    pub fn stream_status_exit_codes(&self) -> Vec<i32> {
        self.stream_status_exit_codes.lock().clone()
    }
}

#[async_trait]
impl MessageProcessor for RecordingProcessor {
    fn initialize(&self, _input: &ReplicationInput, _job_root: &Path) -> anyhow::Result<()> {
        self.record_call("initialize");
        fail_with(self.initialize_error.as_ref())
    }

    async fn internal_process_message_from_source(
        &self,
        message: SyncMessage,
    ) -> anyhow::Result<SyncMessage> {
        fail_with(self.source_error.as_ref())?;
        Ok(message)
    }

    async fn internal_process_message_from_destination(
        &self,
        message: SyncMessage,
    ) -> anyhow::Result<()> {
        self.destination_messages.lock().push(message);
        Ok(())
    }

    async fn process_message_from_source(
        &self,
        message: SyncMessage,
    ) -> anyhow::Result<Option<SyncMessage>> {
        let message = self.internal_process_message_from_source(message).await?;
        Ok((!self.filter_source).then_some(message))
    }

    fn get_stream_status_to_send(&self, exit_code: i32) -> Vec<SyncMessage> {
        self.stream_status_exit_codes.lock().push(exit_code);
        self.stream_statuses.clone()
    }

    fn end_of_source(&self) {
        self.record_call("end_of_source");
    }

    fn end_of_destination(&self) {
        self.record_call("end_of_destination");
    }

    fn end_of_replication(&self) {
        self.record_call("end_of_replication");
    }

    fn get_replication_output(
        &self,
        performance_metrics: Option<PerformanceMetrics>,
    ) -> anyhow::Result<ReplicationOutput> {
        self.record_call("get_replication_output");
        if let Some(message) = &self.output_error {
            anyhow::bail!("{message}");
        }

        let (status, failures) = match &self.run_state {
            Some(run_state) if run_state.is_cancelled() => {
                (ReplicationStatus::Cancelled, run_state.failures())
            }
            Some(run_state) if run_state.has_failed() => {
                (ReplicationStatus::Failed, run_state.failures())
            }
            Some(run_state) => (ReplicationStatus::Completed, run_state.failures()),
            None => (ReplicationStatus::Completed, Vec::new()),
        };
        let now = Utc::now();
        Ok(ReplicationOutput {
            status,
            total_stats: SyncStats::default(),
            stream_stats: Vec::new(),
            failures,
            state: None,
            performance_metrics,
            start_time: now,
            end_time: now,
        })
    }
}
