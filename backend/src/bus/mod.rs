//! In-process message bus: four bounded queues, one per task family.
//!
//! Delivery contract:
//! - at-least-once: a consumer that cannot finish a message puts it back
//!   with `requeue`, and a later take sees it again
//! - prefetch = 1: the receiving half of each queue sits behind a mutex,
//!   so every consumer holds at most one message at a time and takes the
//!   next only after disposing of the previous one

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tracing::warn;
use uuid::Uuid;

use crate::error::TaskError;
use crate::job::model::TaskType;

/// Wire envelope carried on every queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub chunk_id: Uuid,
    pub job_id: Uuid,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
}

/// Queue name for a task family, as it would appear on a broker.
pub fn queue_name(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Tally => "tally.queue",
        TaskType::PartialDecrypt => "partial_decryption.queue",
        TaskType::CompensatedDecrypt => "compensated_decryption.queue",
        TaskType::Combine => "combine.queue",
    }
}

struct Queue {
    tx: mpsc::Sender<Envelope>,
    rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
}

impl Queue {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

/// The four durable-queue endpoints.
pub struct MessageBus {
    tally: Queue,
    partial_decryption: Queue,
    compensated_decryption: Queue,
    combine: Queue,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            tally: Queue::new(capacity),
            partial_decryption: Queue::new(capacity),
            compensated_decryption: Queue::new(capacity),
            combine: Queue::new(capacity),
        }
    }

    fn queue(&self, task_type: TaskType) -> &Queue {
        match task_type {
            TaskType::Tally => &self.tally,
            TaskType::PartialDecrypt => &self.partial_decryption,
            TaskType::CompensatedDecrypt => &self.compensated_decryption,
            TaskType::Combine => &self.combine,
        }
    }

    /// Publish an envelope to its task family's queue.
    ///
    /// Uses `try_send` so a full or closed queue surfaces immediately as a
    /// transient bus error; the chunk stays pending and the scheduler
    /// retries on a later tick.
    pub fn publish(&self, env: Envelope) -> Result<(), TaskError> {
        let name = queue_name(env.task_type);
        self.queue(env.task_type)
            .tx
            .try_send(env)
            .map_err(|e| TaskError::TransientBus(format!("{name}: {e}")))
    }

    /// Consumer endpoint for one task family. Cheap to clone per worker.
    pub fn consumer(&self, task_type: TaskType) -> QueueConsumer {
        let q = self.queue(task_type);
        QueueConsumer {
            task_type,
            tx: q.tx.clone(),
            rx: Arc::clone(&q.rx),
        }
    }
}

/// One queue's consuming side.
#[derive(Clone)]
pub struct QueueConsumer {
    task_type: TaskType,
    tx: mpsc::Sender<Envelope>,
    rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
}

impl QueueConsumer {
    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    /// Take the next message. Resolves to `None` when the queue is closed.
    ///
    /// The receiver lock is released before the message is processed, so
    /// sibling consumers proceed independently; each still holds at most
    /// one in-flight message.
    pub async fn next(&self) -> Option<Envelope> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Return an unprocessed message to the queue (nack).
    pub async fn requeue(&self, env: Envelope) {
        if self.tx.send(env).await.is_err() {
            warn!(
                queue = queue_name(self.task_type),
                "requeue failed; queue closed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(t: TaskType) -> Envelope {
        Envelope {
            chunk_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            task_type: t,
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn publish_then_consume_round_trips() {
        let bus = MessageBus::new(8);
        let sent = env(TaskType::Tally);
        bus.publish(sent.clone()).unwrap();

        let got = bus.consumer(TaskType::Tally).next().await.unwrap();
        assert_eq!(got.chunk_id, sent.chunk_id);
    }

    #[tokio::test]
    async fn queues_are_isolated_per_task_type() {
        let bus = MessageBus::new(8);
        bus.publish(env(TaskType::Combine)).unwrap();

        let tally = bus.consumer(TaskType::Tally);
        let combine = bus.consumer(TaskType::Combine);

        assert!(combine.next().await.is_some());
        // Nothing arrived on the tally queue.
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), tally.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn each_take_hands_out_a_distinct_message() {
        let bus = MessageBus::new(8);
        let a = env(TaskType::PartialDecrypt);
        let b = env(TaskType::PartialDecrypt);
        bus.publish(a.clone()).unwrap();
        bus.publish(b.clone()).unwrap();

        let c1 = bus.consumer(TaskType::PartialDecrypt);
        let c2 = bus.consumer(TaskType::PartialDecrypt);

        let first = c1.next().await.unwrap();
        let second = c2.next().await.unwrap();

        assert_ne!(first.chunk_id, second.chunk_id);
    }

    #[tokio::test]
    async fn requeued_message_is_seen_again() {
        let bus = MessageBus::new(8);
        let sent = env(TaskType::Tally);
        bus.publish(sent.clone()).unwrap();

        let c = bus.consumer(TaskType::Tally);
        let got = c.next().await.unwrap();
        c.requeue(got).await;

        let again = c.next().await.unwrap();
        assert_eq!(again.chunk_id, sent.chunk_id);
    }

    #[tokio::test]
    async fn full_queue_reports_transient_bus_error() {
        let bus = MessageBus::new(1);
        bus.publish(env(TaskType::Tally)).unwrap();

        let err = bus.publish(env(TaskType::Tally)).unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(err.code(), "TRANSIENT_BUS");
    }
}
