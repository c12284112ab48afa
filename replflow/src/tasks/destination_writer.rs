//! Delivers the destination queue to the destination process.

use super::{DestinationSignals, ReplicationTask};
use crate::connectors::{Destination, Source};
use crate::errors::ReplicationError;
use crate::message::SyncMessage;
use crate::observability::PipelineStopwatches;
use crate::processing::MessageProcessor;
use crate::queue::BoundedQueue;
use crate::state::RunState;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::info;

const DELIVERY_FAILED: &str = "Destination process message delivery failed";

/// Drains the destination queue into `Destination::accept`.
///
/// On exit, trailing stream statuses are delivered after a clean drain, the
/// destination input is always closed, and so is the queue.
pub struct DestinationWriter {
    destination: Arc<dyn Destination>,
    source: Arc<dyn Source>,
    processor: Arc<dyn MessageProcessor>,
    queue: Arc<BoundedQueue<SyncMessage>>,
    run_state: Arc<RunState>,
    signals: Arc<DestinationSignals>,
    stopwatches: Arc<PipelineStopwatches>,
}

impl DestinationWriter {
    /// Creates the task.
    ///
    /// Stream statuses are chosen from the exit value of `source`.
    #[must_use]
    pub fn new(
        destination: Arc<dyn Destination>,
        source: Arc<dyn Source>,
        processor: Arc<dyn MessageProcessor>,
        queue: Arc<BoundedQueue<SyncMessage>>,
        run_state: Arc<RunState>,
        signals: Arc<DestinationSignals>,
        stopwatches: Arc<PipelineStopwatches>,
    ) -> Self {
        Self {
            destination,
            source,
            processor,
            queue,
            run_state,
            signals,
            stopwatches,
        }
    }

    async fn write_loop(&self) -> anyhow::Result<()> {
        while !self.run_state.should_abort()
            && !self.queue.is_closed_for_receiving()
            && self.signals.reader_running()
        {
            let Some(message) = self.queue.receive().await else {
                continue;
            };
            self.stopwatches
                .write_to_dest
                .time(self.destination.accept(message))
                .await?;
        }

        for status in self
            .processor
            .get_stream_status_to_send(self.source.exit_value())
        {
            self.destination.accept(status).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for DestinationWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationWriter")
            .field("queue", &self.queue)
            .field("signals", &self.signals)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReplicationTask for DestinationWriter {
    fn name(&self) -> &'static str {
        "write_to_destination"
    }

    async fn run(&self) -> Result<(), ReplicationError> {
        info!(task = self.name(), "start");
        let written = self.write_loop().await;
        let ended = self.destination.notify_end_of_input().await;

        let result = match (written, ended) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), _) | (Ok(()), Err(e)) => {
                self.signals.mark_write_failed();
                info!(task = self.name(), error = %e, "exception caught");
                Err(ReplicationError::destination_with_cause(DELIVERY_FAILED, e))
            }
        };

        info!(
            task = self.name(),
            queue_done = self.queue.is_closed_for_receiving(),
            reader_running = self.signals.reader_running(),
            "done"
        );
        self.queue.close();
        result
    }
}
