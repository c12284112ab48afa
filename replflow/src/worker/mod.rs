//! Replication orchestration.
//!
//! This module provides:
//! - ReplicationWorker, which starts the connectors, runs the sync tasks
//!   concurrently, and assembles the outcome
//! - The input and output types of a replication attempt
//! - ScopedResources for closing everything a run opened

mod context;
mod output;
mod resources;

pub use context::{ReplicationContext, ReplicationInput};
pub use output::{ReplicationOutput, ReplicationStatus, StreamSyncStats, SyncStats};
pub use resources::ScopedResources;

use crate::config::ReplicationConfig;
use crate::connectors::{
    Destination, DestinationTimeoutMonitor, Source, SourceHeartbeatMonitor, SyncPersistence,
};
use crate::errors::{ReplicationError, WorkerError};
use crate::heartbeat::{HeartbeatClient, HeartbeatSender};
use crate::message::SyncMessage;
use crate::observability::PipelineStopwatches;
use crate::processing::{MessageProcessor, MissingStateInjector};
use crate::queue::BoundedQueue;
use crate::state::RunState;
use crate::tasks::{
    DestinationReader, DestinationSignals, DestinationStarter, DestinationWriter,
    MessageProcessorTask, ReplicationTask, SourceReader, SourceStarter,
};
use crate::validation::RecordSchemaValidator;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, info_span, warn, Instrument, Span};

const SYNC_FAILED: &str = "Sync failed";

/// Runs one replication attempt from a source to a destination.
///
/// The worker owns the shared [`RunState`]; every task reads it to decide
/// when to stop and reports failures into it. The processor must report
/// into the same run state for the output to reflect the run.
pub struct ReplicationWorker {
    source: Arc<dyn Source>,
    destination: Arc<dyn Destination>,
    processor: Arc<dyn MessageProcessor>,
    persistence: Arc<dyn SyncPersistence>,
    run_state: Arc<RunState>,
    config: ReplicationConfig,
    validator: Option<Arc<RecordSchemaValidator>>,
    injector: Option<Arc<dyn MissingStateInjector>>,
    heartbeat_client: Option<Arc<dyn HeartbeatClient>>,
    destination_monitor: Option<Arc<dyn DestinationTimeoutMonitor>>,
    source_monitor: Option<Arc<dyn SourceHeartbeatMonitor>>,
    stopwatches: Arc<PipelineStopwatches>,
}

impl fmt::Debug for ReplicationWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationWorker")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("processor", &self.processor)
            .field("run_state", &self.run_state)
            .field("config", &self.config)
            .field("heartbeat", &self.heartbeat_client.is_some())
            .finish_non_exhaustive()
    }
}

impl ReplicationWorker {
    /// Creates a worker with the default configuration and no heartbeat client.
    #[must_use]
    pub fn new(
        source: Arc<dyn Source>,
        destination: Arc<dyn Destination>,
        processor: Arc<dyn MessageProcessor>,
        persistence: Arc<dyn SyncPersistence>,
        run_state: Arc<RunState>,
    ) -> Self {
        Self {
            source,
            destination,
            processor,
            persistence,
            run_state,
            config: ReplicationConfig::default(),
            validator: None,
            injector: None,
            heartbeat_client: None,
            destination_monitor: None,
            source_monitor: None,
            stopwatches: Arc::new(PipelineStopwatches::new()),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReplicationConfig) -> Self {
        self.config = config;
        self
    }

    /// Starts `validator` with the run and closes it at the end.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<RecordSchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Injects missing states after a clean source exit.
    #[must_use]
    pub fn with_injector(mut self, injector: Arc<dyn MissingStateInjector>) -> Self {
        self.injector = Some(injector);
        self
    }

    /// Sends workload heartbeats through `client` while the sync runs.
    #[must_use]
    pub fn with_heartbeat_client(mut self, client: Arc<dyn HeartbeatClient>) -> Self {
        self.heartbeat_client = Some(client);
        self
    }

    /// Skips heartbeats while the destination is stuck on an action.
    #[must_use]
    pub fn with_destination_monitor(mut self, monitor: Arc<dyn DestinationTimeoutMonitor>) -> Self {
        self.destination_monitor = Some(monitor);
        self
    }

    /// Skips heartbeats while the source has stopped beating.
    #[must_use]
    pub fn with_source_monitor(mut self, monitor: Arc<dyn SourceHeartbeatMonitor>) -> Self {
        self.source_monitor = Some(monitor);
        self
    }

    /// Returns the shared run state.
    #[must_use]
    pub fn run_state(&self) -> &Arc<RunState> {
        &self.run_state
    }

    /// Runs the replication to completion.
    ///
    /// Task failures are recorded in the output, never returned. The only
    /// errors are a processor that cannot be initialized and an output that
    /// cannot be assembled.
    pub async fn run(
        &self,
        input: &ReplicationInput,
        job_root: &Path,
    ) -> Result<ReplicationOutput, WorkerError> {
        let span = info_span!(
            "replication",
            job_id = input.context.job_id,
            attempt = input.context.attempt
        );
        self.run_in_span(input, job_root).instrument(span).await
    }

    async fn run_in_span(
        &self,
        input: &ReplicationInput,
        job_root: &Path,
    ) -> Result<ReplicationOutput, WorkerError> {
        info!(job_root = %job_root.display(), "Starting replication");
        self.processor
            .initialize(input, job_root)
            .map_err(|e| WorkerError::with_cause(SYNC_FAILED, e))?;

        if let Some(validator) = &self.validator {
            validator.start();
        }
        let resources = self.open_resources();

        if self.start_connectors(input, job_root).await {
            self.run_state.mark_running();
            let heartbeat = self.spawn_heartbeat(input);
            self.run_sync_tasks().await;
            if let Some(handle) = heartbeat {
                handle.abort();
                let _ = handle.await;
            }
            self.run_state.mark_stopped();
        }

        for err in resources.close_all().await {
            self.run_state.track_failure(&err);
            self.run_state.mark_failed();
        }

        if !self.run_state.is_cancelled() {
            self.processor.end_of_replication();
        }

        let output = self
            .processor
            .get_replication_output(Some(self.stopwatches.metrics()))
            .map_err(|e| WorkerError::with_cause(SYNC_FAILED, e))?;
        info!(
            status = %output.status,
            failures = output.failures.len(),
            "Replication finished"
        );
        Ok(output)
    }

    /// Registers closers so that persistence, destination, validator and
    /// source are closed in that order.
    fn open_resources(&self) -> ScopedResources {
        let resources = ScopedResources::new();

        let source = self.source.clone();
        resources.register("source", move || async move {
            source.close().await.map_err(|e| {
                ReplicationError::source_with_cause("Source process close failed", e)
            })
        });

        if let Some(validator) = self.validator.clone() {
            resources.register("validator", move || async move {
                validator.close().await.map_err(|e| {
                    ReplicationError::replication_with_cause("Schema validator close failed", e)
                })
            });
        }

        let destination = self.destination.clone();
        resources.register("destination", move || async move {
            destination.close().await.map_err(|e| {
                ReplicationError::destination_with_cause("Destination process close failed", e)
            })
        });

        let persistence = self.persistence.clone();
        resources.register("persistence", move || async move {
            persistence.close().await.map_err(|e| {
                ReplicationError::replication_with_cause("Sync persistence close failed", e)
            })
        });

        resources
    }

    /// Starts both connectors concurrently. Returns false if either failed.
    async fn start_connectors(&self, input: &ReplicationInput, job_root: &Path) -> bool {
        let source = SourceStarter::new(
            self.source.clone(),
            input.source_config.clone(),
            job_root.to_path_buf(),
        );
        let destination = DestinationStarter::new(
            self.destination.clone(),
            input.destination_config.clone(),
            job_root.to_path_buf(),
        );

        let (source_started, destination_started) =
            futures::join!(source.run(), destination.run());

        let mut started = true;
        for result in [source_started, destination_started] {
            if let Err(err) = result {
                self.run_state.track_failure(&err);
                self.run_state.mark_failed();
                started = false;
            }
        }
        started
    }

    fn spawn_heartbeat(
        &self,
        input: &ReplicationInput,
    ) -> Option<JoinHandle<Result<(), ReplicationError>>> {
        if !self.config.heartbeat_enabled {
            return None;
        }
        let client = self.heartbeat_client.clone()?;

        let mut sender = HeartbeatSender::new(
            client,
            input.context.workload_id(),
            self.run_state.clone(),
            self.config.heartbeat_interval(),
            self.config.heartbeat_timeout(),
        );
        if let Some(monitor) = self.destination_monitor.clone() {
            sender = sender.with_destination_monitor(monitor);
        }
        if let Some(monitor) = self.source_monitor.clone() {
            sender = sender.with_source_monitor(monitor);
        }

        Some(tokio::spawn(
            async move { sender.run().await }.instrument(Span::current()),
        ))
    }

    /// Runs the four sync tasks and waits for all of them.
    async fn run_sync_tasks(&self) {
        let from_source: Arc<BoundedQueue<SyncMessage>> =
            Arc::new(BoundedQueue::new(self.config.source_buffer_size));
        let for_destination: Arc<BoundedQueue<SyncMessage>> =
            Arc::new(BoundedQueue::new(self.config.destination_buffer_size));
        let signals = Arc::new(DestinationSignals::new());
        let poll_interval = self.config.read_poll_interval();

        let mut source_reader = SourceReader::new(
            self.source.clone(),
            self.processor.clone(),
            from_source.clone(),
            self.run_state.clone(),
            self.stopwatches.clone(),
        )
        .with_poll_interval(poll_interval);
        if let Some(injector) = self.injector.clone() {
            source_reader = source_reader.with_injector(injector);
        }

        let tasks: Vec<Arc<dyn ReplicationTask>> = vec![
            Arc::new(source_reader),
            Arc::new(MessageProcessorTask::new(
                self.processor.clone(),
                from_source.clone(),
                for_destination.clone(),
                self.run_state.clone(),
                self.stopwatches.clone(),
            )),
            Arc::new(DestinationWriter::new(
                self.destination.clone(),
                self.source.clone(),
                self.processor.clone(),
                for_destination.clone(),
                self.run_state.clone(),
                signals.clone(),
                self.stopwatches.clone(),
            )),
            Arc::new(
                DestinationReader::new(
                    self.destination.clone(),
                    self.processor.clone(),
                    self.run_state.clone(),
                    signals,
                    self.stopwatches.clone(),
                )
                .with_poll_interval(poll_interval),
            ),
        ];

        let mut set = JoinSet::new();
        for task in tasks {
            set.spawn(
                async move {
                    let name = task.name();
                    (name, task.run().await)
                }
                .instrument(Span::current()),
            );
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(err))) => {
                    warn!(task = name, error = %err, "Replication task failed");
                    self.run_state.track_failure(&err);
                    self.run_state.mark_failed();
                }
                Err(join_err) => {
                    warn!(error = %join_err, "Replication task panicked");
                    self.run_state.track_failure(&ReplicationError::replication_with_cause(
                        "Replication task panicked",
                        join_err,
                    ));
                    self.run_state.mark_failed();
                    // A panicked task never closed its queues.
                    from_source.close();
                    for_destination.close();
                }
            }
        }
    }

    /// Cancels a running replication.
    ///
    /// Connector cancel errors are logged, not returned.
    pub async fn cancel(&self) {
        info!("Cancelling replication");
        self.run_state.mark_cancelled();

        if let Err(e) = self.destination.cancel().await {
            warn!(error = %e, "Failed to cancel destination");
        }
        if let Err(e) = self.source.cancel().await {
            warn!(error = %e, "Failed to cancel source");
        }
        self.processor.end_of_replication();
    }
}
