//! Routes processed source messages to the destination queue.

use super::ReplicationTask;
use crate::errors::ReplicationError;
use crate::message::{MessageKind, SyncMessage};
use crate::observability::PipelineStopwatches;
use crate::processing::MessageProcessor;
use crate::queue::BoundedQueue;
use crate::state::RunState;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Moves messages from the source queue through the processor into the
/// destination queue. Only RECORD and STATE messages are forwarded.
///
/// Both queues are closed on every exit path.
pub struct MessageProcessorTask {
    processor: Arc<dyn MessageProcessor>,
    from_source: Arc<BoundedQueue<SyncMessage>>,
    for_destination: Arc<BoundedQueue<SyncMessage>>,
    run_state: Arc<RunState>,
    stopwatches: Arc<PipelineStopwatches>,
}

impl MessageProcessorTask {
    /// Creates the task.
    #[must_use]
    pub fn new(
        processor: Arc<dyn MessageProcessor>,
        from_source: Arc<BoundedQueue<SyncMessage>>,
        for_destination: Arc<BoundedQueue<SyncMessage>>,
        run_state: Arc<RunState>,
        stopwatches: Arc<PipelineStopwatches>,
    ) -> Self {
        Self {
            processor,
            from_source,
            for_destination,
            run_state,
            stopwatches,
        }
    }

    async fn process_loop(&self) -> Result<(), ReplicationError> {
        while !self.run_state.should_abort()
            && !self.from_source.is_closed_for_receiving()
            && !self.for_destination.is_closed_for_sending()
        {
            let Some(message) = self.from_source.receive().await else {
                continue;
            };

            let processed = self
                .stopwatches
                .process_from_source
                .time(self.processor.process_message_from_source(message))
                .await
                .map_err(|e| {
                    ReplicationError::replication_with_cause("Failed to process source message", e)
                })?;

            if let Some(message) = processed {
                if matches!(message.kind(), MessageKind::Record | MessageKind::State) {
                    self.for_destination.send(message).await;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MessageProcessorTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageProcessorTask")
            .field("from_source", &self.from_source)
            .field("for_destination", &self.for_destination)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReplicationTask for MessageProcessorTask {
    fn name(&self) -> &'static str {
        "process_message"
    }

    async fn run(&self) -> Result<(), ReplicationError> {
        info!(task = self.name(), "start");
        let result = self.process_loop().await;
        if let Err(e) = &result {
            info!(task = self.name(), error = %e, "exception caught");
        }
        info!(
            task = self.name(),
            from_source_done = self.from_source.is_closed_for_receiving(),
            for_destination_closed = self.for_destination.is_closed_for_sending(),
            "done"
        );
        self.from_source.close();
        self.for_destination.close();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::LogLevel;
    use crate::testing::{fixtures, RecordingProcessor};
    use std::time::Duration;

    fn task(
        processor: Arc<RecordingProcessor>,
    ) -> (
        MessageProcessorTask,
        Arc<BoundedQueue<SyncMessage>>,
        Arc<BoundedQueue<SyncMessage>>,
        Arc<RunState>,
    ) {
        let from_source = Arc::new(BoundedQueue::new(16));
        let for_destination = Arc::new(BoundedQueue::new(16));
        let run_state = Arc::new(RunState::new());
        let task = MessageProcessorTask::new(
            processor,
            from_source.clone(),
            for_destination.clone(),
            run_state.clone(),
            Arc::new(PipelineStopwatches::new()),
        );
        (task, from_source, for_destination, run_state)
    }

    #[tokio::test]
    async fn test_only_records_and_states_are_forwarded() {
        let (task, from_source, for_destination, _) = task(Arc::new(RecordingProcessor::new()));

        from_source.send(fixtures::record("users", 1)).await;
        from_source.send(SyncMessage::log(LogLevel::Info, "hello")).await;
        from_source.send(SyncMessage::error_trace("oops", None)).await;
        from_source.send(fixtures::stream_state("users", 1)).await;
        from_source.close();

        task.run().await.unwrap();

        let mut kinds = Vec::new();
        while let Some(message) = for_destination.receive().await {
            kinds.push(message.kind());
        }
        assert_eq!(kinds, vec![MessageKind::Record, MessageKind::State]);
        assert!(for_destination.is_closed_for_receiving());
    }

    #[tokio::test]
    async fn test_empty_processing_result_is_not_forwarded() {
        let processor = Arc::new(RecordingProcessor::new().with_filtered_source_messages());
        let (task, from_source, for_destination, _) = task(processor);

        from_source.send(fixtures::record("users", 1)).await;
        from_source.close();
        task.run().await.unwrap();

        assert_eq!(for_destination.receive().await, None);
    }

    #[tokio::test]
    async fn test_processing_error_closes_both_queues() {
        let processor = Arc::new(RecordingProcessor::new().with_source_error("bad mapping"));
        let (task, from_source, for_destination, _) = task(processor);

        from_source.send(fixtures::record("users", 1)).await;
        let err = task.run().await.unwrap_err();

        assert_eq!(err.origin(), crate::state::FailureOrigin::Replication);
        assert!(from_source.is_closed_for_sending());
        assert!(for_destination.is_closed_for_sending());
    }

    #[tokio::test]
    async fn test_abort_stops_processing() {
        let (task, from_source, for_destination, run_state) =
            task(Arc::new(RecordingProcessor::new()));
        run_state.abort();
        from_source.send(fixtures::record("users", 1)).await;

        tokio::time::timeout(Duration::from_secs(1), task.run())
            .await
            .expect("processor should observe abort")
            .unwrap();
        assert_eq!(for_destination.len(), 0);
        assert!(for_destination.is_closed_for_sending());
    }
}
