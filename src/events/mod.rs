use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, info, warn};

use crate::entities::MovementType;

pub mod lifecycle;
pub mod worker;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end for `process_events`.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Queues without waiting or surfacing failure. A committed movement is never undone
    /// because nobody is listening, and a slow consumer never holds up a writer.
    pub fn send_or_log(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            let reason = match e {
                TrySendError::Full(_) => "full",
                TrySendError::Closed(_) => "closed",
            };
            metrics::counter!("inventory_ledger.events_dropped", 1, "reason" => reason);
            warn!(reason, "Dropping inventory event");
        }
    }
}

/// Notifications emitted after a ledger write has committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    StockMovementRecorded {
        movement_id: i64,
        variant_id: i64,
        location_id: i64,
        movement_type: MovementType,
        quantity: i64,
        quantity_before: i64,
        quantity_after: i64,
        variant_total: i64,
        order_id: Option<i64>,
        return_id: Option<i64>,
    },
    NegativeStockDetected {
        variant_id: i64,
        location_id: i64,
        quantity: i64,
        movement_id: i64,
    },
    VariantAggregateResynced {
        variant_id: i64,
        previous_total: i64,
        current_total: i64,
    },
}

impl Event {
    pub fn variant_id(&self) -> i64 {
        match self {
            Event::StockMovementRecorded { variant_id, .. }
            | Event::NegativeStockDetected { variant_id, .. }
            | Event::VariantAggregateResynced { variant_id, .. } => *variant_id,
        }
    }
}

// Handlers registered by embedding applications (cache invalidation, storefront sync).
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Drains the event channel, logging each event and fanning it out to `handlers`.
///
/// Returns once every `EventSender` has been dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Box<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::StockMovementRecorded {
                movement_id,
                variant_id,
                location_id,
                movement_type,
                quantity,
                quantity_after,
                ..
            } => info!(
                movement_id,
                variant_id,
                location_id,
                %movement_type,
                quantity,
                quantity_after,
                "Stock movement recorded"
            ),
            Event::NegativeStockDetected {
                variant_id,
                location_id,
                quantity,
                ..
            } => warn!(
                variant_id,
                location_id, quantity, "Location stock is negative (oversold)"
            ),
            Event::VariantAggregateResynced {
                variant_id,
                previous_total,
                current_total,
            } => {
                if previous_total != current_total {
                    warn!(
                        variant_id,
                        previous_total, current_total, "Variant aggregate drift corrected"
                    );
                } else {
                    info!(variant_id, current_total, "Variant aggregate verified");
                }
            }
        }

        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!(
                    "Event handler failed: variant_id={}, error={}",
                    event.variant_id(),
                    e
                );
            }
        }
    }

    info!("Event processing loop stopped");
}
