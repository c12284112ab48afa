//! Bounded, closable hand-off queue between pipeline tasks.
//!
//! This module provides:
//! - BoundedQueue, a backpressured single-producer/single-consumer buffer
//! - QueueMetrics for monitoring throughput and backpressure

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

/// Counters describing the traffic through one queue.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
    full_waits: AtomicU64,
}

impl QueueMetrics {
    fn record_send(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn record_receive(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_full_wait(&self) {
        self.full_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of items accepted by `send`.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Returns the number of items handed out by `receive`.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Returns the number of items rejected because the queue was closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns how many sends had to wait for free capacity.
    #[must_use]
    pub fn full_waits(&self) -> u64 {
        self.full_waits.load(Ordering::Relaxed)
    }

    /// Converts metrics to a JSON object.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "sent": self.sent(),
            "received": self.received(),
            "dropped": self.dropped(),
            "full_waits": self.full_waits(),
        })
    }
}

/// An ordered, capacity-limited buffer with a single close transition.
///
/// `send` suspends while the queue is full and open. `receive` suspends while
/// the queue is empty and open, and returns `None` once the queue is closed
/// and drained. Items buffered before `close` remain receivable.
pub struct BoundedQueue<T> {
    buffer: Mutex<VecDeque<T>>,
    capacity: usize,
    closed: AtomicBool,
    not_empty: Notify,
    not_full: Notify,
    metrics: QueueMetrics,
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            closed: AtomicBool::new(false),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            metrics: QueueMetrics::default(),
        }
    }

    /// Sends an item, waiting for capacity while the queue is full and open.
    ///
    /// Returns false, dropping the item, if the queue is closed.
    pub async fn send(&self, item: T) -> bool {
        let mut item = Some(item);
        let mut waited = false;
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut buffer = self.buffer.lock();
                if self.closed.load(Ordering::SeqCst) {
                    drop(buffer);
                    self.metrics.record_drop();
                    return false;
                }
                if buffer.len() < self.capacity {
                    if let Some(item) = item.take() {
                        buffer.push_back(item);
                    }
                    drop(buffer);
                    self.metrics.record_send();
                    self.not_empty.notify_one();
                    return true;
                }
            }

            if !waited {
                waited = true;
                self.metrics.record_full_wait();
            }
            notified.await;
        }
    }

    /// Receives the next item, waiting while the queue is empty and open.
    ///
    /// Returns `None` once the queue is closed and drained; every later call
    /// also returns `None`.
    pub async fn receive(&self) -> Option<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut buffer = self.buffer.lock();
                if let Some(item) = buffer.pop_front() {
                    drop(buffer);
                    self.metrics.record_receive();
                    self.not_full.notify_one();
                    return Some(item);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Closes the queue. Idempotent; wakes every waiting sender and receiver.
    pub fn close(&self) {
        {
            let _buffer = self.buffer.lock();
            self.closed.store(true, Ordering::SeqCst);
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Returns true once no further items are accepted.
    #[must_use]
    pub fn is_closed_for_sending(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns true once the queue is closed and fully drained.
    #[must_use]
    pub fn is_closed_for_receiving(&self) -> bool {
        let buffer = self.buffer.lock();
        self.closed.load(Ordering::SeqCst) && buffer.is_empty()
    }

    /// Returns the number of buffered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Returns the queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the queue metrics.
    #[must_use]
    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[test]
    fn test_full_queue_send_waits_for_receive() {
        let queue = BoundedQueue::new(1);
        assert_ready_eq!(task::spawn(queue.send(1)).poll(), true);

        let mut send = task::spawn(queue.send(2));
        assert_pending!(send.poll());
        assert_eq!(queue.metrics().full_waits(), 1);

        let mut receive = task::spawn(queue.receive());
        assert_ready_eq!(receive.poll(), Some(1));
        assert!(send.is_woken());
        assert_ready_eq!(send.poll(), true);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_close_wakes_pending_receiver() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(4);
        let mut receive = task::spawn(queue.receive());
        assert_pending!(receive.poll());

        queue.close();
        assert!(receive.is_woken());
        assert_ready_eq!(receive.poll(), None);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = BoundedQueue::new(16);
        for i in 0..10 {
            assert!(queue.send(i).await);
        }
        for i in 0..10 {
            assert_eq!(queue.receive().await, Some(i));
        }
        assert_eq!(queue.metrics().sent(), 10);
        assert_eq!(queue.metrics().received(), 10);
    }

    #[tokio::test]
    async fn test_close_drains_then_returns_sentinel() {
        let queue = BoundedQueue::new(4);
        queue.send("a").await;
        queue.send("b").await;
        queue.close();

        assert!(queue.is_closed_for_sending());
        assert!(!queue.is_closed_for_receiving());
        assert_eq!(queue.receive().await, Some("a"));
        assert_eq!(queue.receive().await, Some("b"));
        assert_eq!(queue.receive().await, None);
        assert_eq!(queue.receive().await, None);
        assert!(queue.is_closed_for_receiving());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(1);
        queue.close();
        queue.close();
        assert!(queue.is_closed_for_receiving());
    }

    #[tokio::test]
    async fn test_send_after_close_is_dropped() {
        let queue = BoundedQueue::new(4);
        queue.close();

        assert!(!queue.send(1).await);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.metrics().dropped(), 1);
    }

    #[tokio::test]
    async fn test_blocked_sender_released_by_close() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.send(1).await;

        let sender = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.send(2).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let accepted = tokio::time::timeout(Duration::from_secs(1), sender)
            .await
            .expect("sender should not hang")
            .unwrap();
        assert!(!accepted);
        assert_eq!(queue.metrics().full_waits(), 1);
    }

    #[tokio::test]
    async fn test_blocked_receiver_released_by_close() {
        let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(1));

        let receiver = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let received = tokio::time::timeout(Duration::from_secs(1), receiver)
            .await
            .expect("receiver should not hang")
            .unwrap();
        assert_eq!(received, None);
    }

    #[tokio::test]
    async fn test_backpressure_with_concurrent_consumer() {
        let queue = Arc::new(BoundedQueue::new(2));

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                for i in 0..100 {
                    queue.send(i).await;
                }
                queue.close();
            })
        };

        let mut received = Vec::new();
        while let Some(item) = queue.receive().await {
            assert!(queue.len() <= 2);
            received.push(item);
        }
        producer.await.unwrap();

        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(0);
        assert_eq!(queue.capacity(), 1);
    }

    #[test]
    fn test_metrics_to_dict() {
        let metrics = QueueMetrics::default();
        metrics.record_send();
        let dict = metrics.to_dict();
        assert_eq!(dict["sent"], 1);
        assert_eq!(dict["dropped"], 0);
    }
}
