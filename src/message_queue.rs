/*!
 * # Message Queue Implementation
 *
 * Durable-queue abstraction the lifecycle worker consumes. Delivery is
 * at-least-once: a message handed out by `subscribe` stays in flight until it is
 * acked, and a `nack` puts it back on the queue until its retry budget runs out.
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::config::AppConfig;

const DEFAULT_MAX_RETRIES: u32 = 3;

/// Message queue errors
#[derive(Error, Debug)]
pub enum MessageQueueError {
    #[error("Queue is full")]
    QueueFull,
    #[error("Unknown message: {0}")]
    UnknownMessage(Uuid),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Message envelope for queue items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Message {
    pub fn new(topic: String, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
            payload,
            timestamp: chrono::Utc::now(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// A message that will not be delivered again.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message: Message,
    pub reason: String,
}

/// Message queue trait for different implementations
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError>;
    /// Takes the next message for `topic` and marks it in flight.
    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError>;
    async fn ack(&self, message_id: &Uuid) -> Result<(), MessageQueueError>;
    /// Returns an in-flight message for redelivery, or dead-letters it once retries are exhausted.
    async fn nack(&self, message_id: &Uuid) -> Result<(), MessageQueueError>;
    /// Dead-letters an in-flight message without further delivery attempts.
    async fn reject(&self, message_id: &Uuid, reason: &str) -> Result<(), MessageQueueError>;
}

#[derive(Debug, Default)]
struct QueueState {
    queues: HashMap<String, VecDeque<Message>>,
    in_flight: HashMap<Uuid, Message>,
    dead_letters: Vec<DeadLetter>,
}

/// In-memory message queue implementation
#[derive(Debug)]
pub struct InMemoryMessageQueue {
    state: Mutex<QueueState>,
    max_size: usize,
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::with_max_size(1000)
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::with_max_size(config.queue_max_size)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_size,
        }
    }

    /// Number of messages waiting for delivery on `topic`.
    pub async fn pending(&self, topic: &str) -> usize {
        let state = self.state.lock().await;
        state.queues.get(topic).map_or(0, VecDeque::len)
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError> {
        let mut state = self.state.lock().await;
        let queue = state.queues.entry(message.topic.clone()).or_default();

        if queue.len() >= self.max_size {
            return Err(MessageQueueError::QueueFull);
        }

        queue.push_back(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError> {
        let mut state = self.state.lock().await;
        let next = state.queues.get_mut(topic).and_then(VecDeque::pop_front);
        if let Some(message) = &next {
            state.in_flight.insert(message.id, message.clone());
        }
        Ok(next)
    }

    async fn ack(&self, message_id: &Uuid) -> Result<(), MessageQueueError> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(message_id)
            .map(|_| ())
            .ok_or(MessageQueueError::UnknownMessage(*message_id))
    }

    async fn nack(&self, message_id: &Uuid) -> Result<(), MessageQueueError> {
        let mut state = self.state.lock().await;
        let mut message = state
            .in_flight
            .remove(message_id)
            .ok_or(MessageQueueError::UnknownMessage(*message_id))?;

        if message.retry_count >= message.max_retries {
            warn!(
                message_id = %message.id,
                topic = %message.topic,
                retries = message.retry_count,
                "message exhausted its retries; dead-lettering"
            );
            state.dead_letters.push(DeadLetter {
                message,
                reason: "max retries exceeded".to_string(),
            });
            return Ok(());
        }

        message.retry_count += 1;
        // Redelivery bypasses max_size; the message already held a slot.
        state
            .queues
            .entry(message.topic.clone())
            .or_default()
            .push_back(message);
        Ok(())
    }

    async fn reject(&self, message_id: &Uuid, reason: &str) -> Result<(), MessageQueueError> {
        let mut state = self.state.lock().await;
        let message = state
            .in_flight
            .remove(message_id)
            .ok_or(MessageQueueError::UnknownMessage(*message_id))?;
        state.dead_letters.push(DeadLetter {
            message,
            reason: reason.to_string(),
        });
        Ok(())
    }
}
