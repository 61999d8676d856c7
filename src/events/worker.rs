use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    config::AppConfig,
    errors::ServiceError,
    events::lifecycle::{LifecycleEvent, LIFECYCLE_TOPIC},
    message_queue::{Message, MessageQueue},
    services::lifecycle::{AdapterOutcome, LifecycleAdapters},
};

/// Exponent cap for retry backoff.
const MAX_BACKOFF_SHIFT: u32 = 6;

/// What happened to one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Retried,
    DeadLettered,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    pub acked: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl DrainStats {
    fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Acked => self.acked += 1,
            Disposition::Retried => self.retried += 1,
            Disposition::DeadLettered => self.dead_lettered += 1,
        }
    }
}

/// Consumes lifecycle events from the queue and hands them to the adapters.
pub struct LifecycleWorker {
    queue: Arc<dyn MessageQueue>,
    adapters: Arc<LifecycleAdapters>,
    poll_interval: Duration,
    backoff_base: Duration,
    max_retries: u32,
}

impl LifecycleWorker {
    pub fn new(queue: Arc<dyn MessageQueue>, adapters: Arc<LifecycleAdapters>) -> Self {
        Self {
            queue,
            adapters,
            poll_interval: Duration::from_millis(250),
            backoff_base: Duration::from_millis(100),
            max_retries: 5,
        }
    }

    pub fn from_config(
        queue: Arc<dyn MessageQueue>,
        adapters: Arc<LifecycleAdapters>,
        config: &AppConfig,
    ) -> Self {
        Self {
            poll_interval: config.worker_poll_interval(),
            backoff_base: config.worker_backoff_base(),
            max_retries: config.queue_max_retries,
            ..Self::new(queue, adapters)
        }
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    /// Publishes `event` on the lifecycle topic with this worker's retry budget.
    pub async fn publish(&self, event: &LifecycleEvent) -> Result<(), ServiceError> {
        let message = event.to_message()?.with_max_retries(self.max_retries);
        self.queue
            .publish(message)
            .await
            .map_err(|e| ServiceError::QueueError(e.to_string()))
    }

    /// Processes messages until the topic is empty, including redeliveries.
    pub async fn drain_once(&self) -> Result<DrainStats, ServiceError> {
        let mut stats = DrainStats::default();
        while let Some(message) = self.next_message().await? {
            stats.record(self.process(message).await?);
        }
        Ok(stats)
    }

    /// Polls until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(topic = LIFECYCLE_TOPIC, "Lifecycle worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.next_message().await {
                Ok(Some(message)) => {
                    if let Err(e) = self.process(message).await {
                        error!("Lifecycle worker failed to settle message: {}", e);
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!("Lifecycle worker failed to poll queue: {}", e),
            }

            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Lifecycle worker stopped");
    }

    async fn next_message(&self) -> Result<Option<Message>, ServiceError> {
        self.queue
            .subscribe(LIFECYCLE_TOPIC)
            .await
            .map_err(|e| ServiceError::QueueError(e.to_string()))
    }

    async fn process(&self, message: Message) -> Result<Disposition, ServiceError> {
        let event = match LifecycleEvent::from_message(&message) {
            Ok(event) => event,
            Err(e) => {
                warn!(message_id = %message.id, "Undecodable lifecycle payload: {}", e);
                return self
                    .reject(&message, &format!("undecodable payload: {}", e))
                    .await;
            }
        };

        match self.adapters.handle(&event).await {
            Ok(outcome) => {
                match &outcome {
                    AdapterOutcome::Applied(records) => debug!(
                        event = event.kind(),
                        movements = records.len(),
                        "Lifecycle event applied"
                    ),
                    AdapterOutcome::Skipped(reason) => {
                        info!(event = event.kind(), %reason, "Lifecycle event skipped")
                    }
                }
                self.queue
                    .ack(&message.id)
                    .await
                    .map_err(|e| ServiceError::QueueError(e.to_string()))?;
                Ok(Disposition::Acked)
            }
            Err(e) if e.is_retryable() && message.retry_count < message.max_retries => {
                let delay = self.backoff_for(message.retry_count);
                warn!(
                    event = event.kind(),
                    attempt = message.retry_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retryable failure handling lifecycle event: {}",
                    e
                );
                metrics::counter!("inventory_ledger.lifecycle_retries", 1);
                sleep(delay).await;
                self.queue
                    .nack(&message.id)
                    .await
                    .map_err(|e| ServiceError::QueueError(e.to_string()))?;
                Ok(Disposition::Retried)
            }
            Err(e) => {
                error!(
                    event = event.kind(),
                    code = e.error_code(),
                    "Giving up on lifecycle event: {}",
                    e
                );
                self.reject(&message, &e.to_string()).await
            }
        }
    }

    async fn reject(&self, message: &Message, reason: &str) -> Result<Disposition, ServiceError> {
        metrics::counter!("inventory_ledger.lifecycle_dead_letters", 1);
        self.queue
            .reject(&message.id, reason)
            .await
            .map_err(|e| ServiceError::QueueError(e.to_string()))?;
        Ok(Disposition::DeadLettered)
    }

    fn backoff_for(&self, retry_count: u32) -> Duration {
        self.backoff_base * 2u32.pow(retry_count.min(MAX_BACKOFF_SHIFT))
    }
}
