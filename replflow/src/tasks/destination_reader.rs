//! Reads what the destination process emits back.

use super::{DestinationSignals, ReplicationTask};
use crate::connectors::Destination;
use crate::errors::ReplicationError;
use crate::observability::PipelineStopwatches;
use crate::processing::MessageProcessor;
use crate::state::RunState;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Pulls state acknowledgements and control messages from the destination.
pub struct DestinationReader {
    destination: Arc<dyn Destination>,
    processor: Arc<dyn MessageProcessor>,
    run_state: Arc<RunState>,
    signals: Arc<DestinationSignals>,
    stopwatches: Arc<PipelineStopwatches>,
    poll_interval: Duration,
}

impl DestinationReader {
    /// Creates the task.
    #[must_use]
    pub fn new(
        destination: Arc<dyn Destination>,
        processor: Arc<dyn MessageProcessor>,
        run_state: Arc<RunState>,
        signals: Arc<DestinationSignals>,
        stopwatches: Arc<PipelineStopwatches>,
    ) -> Self {
        Self {
            destination,
            processor,
            run_state,
            signals,
            stopwatches,
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Sets the sleep between empty reads.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn destination_is_finished(&self) -> bool {
        let _timer = self.stopwatches.read_from_dest.start();
        self.destination.is_finished()
    }

    async fn read_loop(&self, destination_finished: &mut bool) -> Result<(), ReplicationError> {
        while !self.run_state.should_abort() && !self.signals.write_failed() {
            *destination_finished = self.destination_is_finished();
            if *destination_finished {
                break;
            }

            let message = self
                .stopwatches
                .read_from_dest
                .time(self.destination.attempt_read())
                .await
                .map_err(|e| {
                    ReplicationError::destination_with_cause(
                        "Destination process read attempt failed",
                        e,
                    )
                })?;

            match message {
                Some(message) => {
                    self.stopwatches
                        .process_from_dest
                        .time(self.processor.process_message_from_destination(message))
                        .await
                        .map_err(|e| {
                            ReplicationError::replication_with_cause(
                                "Failed to process destination message",
                                e,
                            )
                        })?;
                }
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }

        if self.run_state.should_abort() {
            info!(task = self.name(), "Abort requested, cancelling destination");
            if let Err(e) = self.destination.cancel().await {
                warn!(task = self.name(), error = %e, "Error cancelling destination");
            }
        }

        let exit_value = self.destination.exit_value();
        if exit_value != 0 {
            return Err(ReplicationError::destination(format!(
                "Destination process exited with non-zero exit code {exit_value}"
            )));
        }

        self.processor.end_of_destination();
        Ok(())
    }
}

impl fmt::Debug for DestinationReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationReader")
            .field("signals", &self.signals)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReplicationTask for DestinationReader {
    fn name(&self) -> &'static str {
        "read_from_destination"
    }

    async fn run(&self) -> Result<(), ReplicationError> {
        info!(task = self.name(), "start");
        let mut destination_finished = false;
        let result = self.read_loop(&mut destination_finished).await;
        if let Err(e) = &result {
            info!(task = self.name(), error = %e, "exception caught");
        }
        info!(
            task = self.name(),
            write_failed = self.signals.write_failed(),
            destination_finished,
            "done"
        );
        self.signals.mark_reader_stopped();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FailureOrigin;
    use crate::testing::{fixtures, RecordingDestination, RecordingProcessor};

    fn reader(
        destination: Arc<RecordingDestination>,
        processor: Arc<RecordingProcessor>,
        run_state: Arc<RunState>,
        signals: Arc<DestinationSignals>,
    ) -> DestinationReader {
        DestinationReader::new(
            destination,
            processor,
            run_state,
            signals,
            Arc::new(PipelineStopwatches::new()),
        )
        .with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_forwards_output_and_ends() {
        let destination = Arc::new(
            RecordingDestination::new().with_output(vec![fixtures::stream_state("users", 1)]),
        );
        destination.notify_end_of_input().await.unwrap();
        let processor = Arc::new(RecordingProcessor::new());
        let signals = Arc::new(DestinationSignals::new());

        reader(
            destination,
            processor.clone(),
            Arc::new(RunState::new()),
            signals.clone(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(processor.destination_messages().len(), 1);
        assert!(processor.was_called("end_of_destination"));
        assert!(!signals.reader_running());
    }

    #[tokio::test]
    async fn test_non_zero_exit_skips_end_of_destination() {
        let destination = Arc::new(RecordingDestination::new().with_exit_value(1));
        destination.notify_end_of_input().await.unwrap();
        let processor = Arc::new(RecordingProcessor::new());

        let err = reader(
            destination,
            processor.clone(),
            Arc::new(RunState::new()),
            Arc::new(DestinationSignals::new()),
        )
        .run()
        .await
        .unwrap_err();

        assert_eq!(err.origin(), FailureOrigin::Destination);
        assert_eq!(
            err.to_string(),
            "Destination process exited with non-zero exit code 1"
        );
        assert!(!processor.was_called("end_of_destination"));
    }

    #[tokio::test]
    async fn test_read_error_is_wrapped() {
        let destination = Arc::new(RecordingDestination::new().with_read_error("eof"));
        let err = reader(
            destination,
            Arc::new(RecordingProcessor::new()),
            Arc::new(RunState::new()),
            Arc::new(DestinationSignals::new()),
        )
        .run()
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "Destination process read attempt failed");
    }

    #[tokio::test]
    async fn test_abort_cancels_destination() {
        let destination = Arc::new(RecordingDestination::new());
        let run_state = Arc::new(RunState::new());
        let task = reader(
            destination.clone(),
            Arc::new(RecordingProcessor::new()),
            run_state.clone(),
            Arc::new(DestinationSignals::new()),
        );

        let handle = tokio::spawn(async move { task.run().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        run_state.abort();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reader should observe abort")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(destination.cancel_count(), 1);
    }
}
