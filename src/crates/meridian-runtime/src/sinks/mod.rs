//! Bounded producer/consumer sinks
//!
//! Each sink owns one bounded queue and one stop flag behind a single async
//! mutex. `enqueue` never blocks: a full queue returns `false` so callers
//! can convert sustained backpressure into deferral. Stopping a sink lets
//! the in-flight item finish, then the loop exits with the remaining queue
//! contents preserved.

mod action;
mod deferral;
mod feedback;

pub use action::{ActionSink, SinkAction};
pub use deferral::{format_deferral_report, DeferralSink};
pub use feedback::{FeedbackItem, FeedbackSink};

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

struct QueueInner<T> {
    items: VecDeque<T>,
    stopped: bool,
}

/// Bounded queue with a stop signal, shared by all sinks.
pub struct SinkQueue<T> {
    inner: Mutex<QueueInner<T>>,
    notify: Notify,
    capacity: usize,
    name: &'static str,
}

impl<T> SinkQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                stopped: false,
            }),
            notify: Notify::new(),
            capacity,
            name,
        })
    }

    /// Add an item. Returns `false` when the queue is full or the sink has
    /// been stopped; never blocks on capacity.
    pub async fn enqueue(&self, item: T) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.stopped {
            tracing::warn!(sink = self.name, "enqueue refused: sink stopped");
            return false;
        }
        if inner.items.len() >= self.capacity {
            tracing::warn!(sink = self.name, "enqueue refused: queue full");
            return false;
        }
        inner.items.push_back(item);
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Next item to process, or `None` once the sink is stopped. Waits when
    /// the queue is empty.
    pub async fn next(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().await;
                if inner.stopped {
                    return None;
                }
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Signal the processing loop to stop. Queued items stay in place.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.stopped = true;
        drop(inner);
        self.notify.notify_waiters();
        tracing::info!(sink = self.name, "sink stop requested");
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    pub async fn is_stopped(&self) -> bool {
        self.inner.lock().await.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = SinkQueue::new("test", 10);
        assert!(queue.enqueue(1).await);
        assert!(queue.enqueue(2).await);
        assert_eq!(queue.next().await, Some(1));
        assert_eq!(queue.next().await, Some(2));
    }

    #[tokio::test]
    async fn test_full_queue_refuses() {
        let queue = SinkQueue::new("test", 2);
        assert!(queue.enqueue(1).await);
        assert!(queue.enqueue(2).await);
        assert!(!queue.enqueue(3).await);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_stop_preserves_items() {
        let queue = SinkQueue::new("test", 10);
        queue.enqueue(1).await;
        queue.enqueue(2).await;
        queue.stop().await;

        assert_eq!(queue.next().await, None);
        assert_eq!(queue.len().await, 2);
        assert!(!queue.enqueue(3).await);
    }

    #[tokio::test]
    async fn test_waiting_consumer_released_on_stop() {
        let queue: Arc<SinkQueue<u32>> = SinkQueue::new("test", 10);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.stop().await;

        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_waiting_consumer_gets_item() {
        let queue: Arc<SinkQueue<u32>> = SinkQueue::new("test", 10);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(7).await;

        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Some(7));
    }
}
