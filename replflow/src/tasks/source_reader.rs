//! Reads the source process into the source queue.

use super::ReplicationTask;
use crate::connectors::Source;
use crate::errors::ReplicationError;
use crate::message::SyncMessage;
use crate::observability::PipelineStopwatches;
use crate::processing::{MessageProcessor, MissingStateInjector};
use crate::queue::BoundedQueue;
use crate::state::RunState;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Pulls messages from the source and pushes them to the processor queue.
///
/// The queue is closed on every exit path.
pub struct SourceReader {
    source: Arc<dyn Source>,
    processor: Arc<dyn MessageProcessor>,
    injector: Option<Arc<dyn MissingStateInjector>>,
    queue: Arc<BoundedQueue<SyncMessage>>,
    run_state: Arc<RunState>,
    stopwatches: Arc<PipelineStopwatches>,
    poll_interval: Duration,
}

impl SourceReader {
    /// Creates the task.
    #[must_use]
    pub fn new(
        source: Arc<dyn Source>,
        processor: Arc<dyn MessageProcessor>,
        queue: Arc<BoundedQueue<SyncMessage>>,
        run_state: Arc<RunState>,
        stopwatches: Arc<PipelineStopwatches>,
    ) -> Self {
        Self {
            source,
            processor,
            injector: None,
            queue,
            run_state,
            stopwatches,
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Tracks every message with `injector` and emits its states after a clean exit.
    #[must_use]
    pub fn with_injector(mut self, injector: Arc<dyn MissingStateInjector>) -> Self {
        self.injector = Some(injector);
        self
    }

    /// Sets the sleep between empty reads.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn source_is_finished(&self) -> bool {
        let _timer = self.stopwatches.read_from_source.start();
        self.source.is_finished()
    }

    async fn read_loop(&self, source_finished: &mut bool) -> Result<(), ReplicationError> {
        while !self.run_state.should_abort() && !self.queue.is_closed_for_sending() {
            *source_finished = self.source_is_finished();
            if *source_finished {
                break;
            }

            let message = self
                .stopwatches
                .read_from_source
                .time(self.source.attempt_read())
                .await
                .map_err(|e| {
                    ReplicationError::source_with_cause("Source process read attempt failed", e)
                })?;

            match message {
                Some(message) => {
                    if let Some(injector) = &self.injector {
                        injector.track_message(&message);
                    }
                    if !self.queue.send(message).await {
                        break;
                    }
                }
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }

        let aborted = self.run_state.should_abort();
        if aborted {
            info!(task = self.name(), "Abort requested, cancelling source");
            if let Err(e) = self.source.cancel().await {
                warn!(task = self.name(), error = %e, "Error cancelling source");
            }
        }

        let exit_value = self.source.exit_value();
        if exit_value != 0 {
            return Err(ReplicationError::source(format!(
                "Source process exited with non-zero exit code {exit_value}"
            )));
        }

        self.processor.end_of_source();

        if let (Some(injector), false) = (&self.injector, aborted) {
            for state in injector.get_states_to_inject() {
                if !self.queue.send(state).await {
                    break;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SourceReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceReader")
            .field("queue", &self.queue)
            .field("injector", &self.injector.is_some())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReplicationTask for SourceReader {
    fn name(&self) -> &'static str {
        "read_from_source"
    }

    async fn run(&self) -> Result<(), ReplicationError> {
        info!(task = self.name(), "start");
        let mut source_finished = false;
        let result = self.read_loop(&mut source_finished).await;
        if let Err(e) = &result {
            info!(task = self.name(), error = %e, "source exception");
        }
        info!(
            task = self.name(),
            source_finished,
            queue_closed = self.queue.is_closed_for_sending(),
            "done"
        );
        self.queue.close();
        result
    }
}
