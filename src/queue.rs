//! Work queue (component M): the durable-work-queue stand-in intake hands
//! run ids to, drained by a fixed pool of worker tasks.
//!
//! `mpsc::Sender::try_send` gives intake a synchronous, non-blocking
//! enqueue — a full queue surfaces as a concrete *enqueue-failed* rather than blocking the request path. A single shared
//! `Receiver` behind a `tokio::sync::Mutex` is drained by N worker tasks:
//! whichever worker is free next pulls the next run id, which is what gives
//! per-`run_id` serial delivery (one consumer at a time) while still
//! processing distinct runs in parallel across workers.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("work queue is full")]
    Full,
    #[error("work queue is closed")]
    Closed,
}

#[derive(Clone)]
pub struct WorkQueue {
    sender: mpsc::Sender<String>,
}

pub struct WorkQueueReceiver {
    receiver: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl Clone for WorkQueueReceiver {
    fn clone(&self) -> Self {
        Self { receiver: Arc::clone(&self.receiver) }
    }
}

impl WorkQueue {
    /// Build a bounded queue and its paired receiver. `capacity` should be
    /// generous relative to `REVIEW_MAX_CONCURRENT_RUNS` — the intake gate
    /// already bounds how many runs can be in flight, so the queue itself
    /// only needs headroom for a burst of enqueues ahead of worker pickup.
    pub fn new(capacity: usize) -> (Self, WorkQueueReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, WorkQueueReceiver { receiver: Arc::new(Mutex::new(receiver)) })
    }

    pub fn enqueue(&self, run_id: String) -> Result<(), EnqueueError> {
        self.sender.try_send(run_id).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}

impl WorkQueueReceiver {
    pub async fn recv(&self) -> Option<String> {
        self.receiver.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_and_receive_round_trips() {
        let (queue, receiver) = WorkQueue::new(4);
        queue.enqueue("run-1".to_string()).unwrap();
        assert_eq!(receiver.recv().await, Some("run-1".to_string()));
    }

    #[tokio::test]
    async fn full_queue_rejects_enqueue() {
        let (queue, _receiver) = WorkQueue::new(1);
        queue.enqueue("run-1".to_string()).unwrap();
        let result = queue.enqueue("run-2".to_string());
        assert!(matches!(result, Err(EnqueueError::Full)));
    }

    #[tokio::test]
    async fn two_receivers_share_the_same_queue() {
        let (queue, receiver) = WorkQueue::new(4);
        let other = receiver.clone();
        queue.enqueue("run-1".to_string()).unwrap();
        queue.enqueue("run-2".to_string()).unwrap();

        let a = receiver.recv().await.unwrap();
        let b = other.recv().await.unwrap();
        let mut got = vec![a, b];
        got.sort();
        assert_eq!(got, vec!["run-1".to_string(), "run-2".to_string()]);
    }
}
