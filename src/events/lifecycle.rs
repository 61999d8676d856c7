//! Inbound business events that move stock.
//!
//! Producers publish these as JSON on [`LIFECYCLE_TOPIC`]. Delivery is at-least-once,
//! so every consumer must tolerate duplicates.

use serde::{Deserialize, Serialize};

use crate::message_queue::Message;

/// Queue topic carrying [`LifecycleEvent`] payloads.
pub const LIFECYCLE_TOPIC: &str = "inventory.lifecycle";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum OrderStatus {
    Pending,
    Processing,
    OnHold,
    Shipped,
    Delivered,
    Cancelled,
    Rejected,
    Archived,
}

impl OrderStatus {
    /// Statuses that hand reserved stock back to the shelf.
    pub fn releases_stock(self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Rejected)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum ReturnStatus {
    Requested,
    Approved,
    Received,
    Completed,
    Rejected,
}

/// One returned line. `order_item_id` ties it back to the sold line when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItem {
    #[serde(default)]
    pub order_item_id: Option<i64>,
    pub variant_id: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    OrderItemCreated {
        order_id: i64,
        #[serde(default)]
        order_item_id: Option<i64>,
        variant_id: i64,
        quantity: i64,
        #[serde(default)]
        integration_id: Option<String>,
    },
    OrderStatusChanged {
        order_id: i64,
        new_status: OrderStatus,
    },
    ReturnStatusChanged {
        return_id: i64,
        order_id: i64,
        new_status: ReturnStatus,
        #[serde(default)]
        items: Vec<ReturnItem>,
    },
    PurchaseOrderItemReceived {
        purchase_order_id: i64,
        purchase_order_item_id: i64,
        variant_id: i64,
        #[serde(default)]
        location_id: Option<i64>,
        quantity: i64,
    },
}

impl LifecycleEvent {
    /// Short name used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::OrderItemCreated { .. } => "order_item_created",
            LifecycleEvent::OrderStatusChanged { .. } => "order_status_changed",
            LifecycleEvent::ReturnStatusChanged { .. } => "return_status_changed",
            LifecycleEvent::PurchaseOrderItemReceived { .. } => "purchase_order_item_received",
        }
    }

    /// Wraps the event in a queue envelope on [`LIFECYCLE_TOPIC`].
    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        Ok(Message::new(
            LIFECYCLE_TOPIC.to_string(),
            serde_json::to_value(self)?,
        ))
    }

    pub fn from_message(message: &Message) -> Result<Self, serde_json::Error> {
        serde_json::from_value(message.payload.clone())
    }
}
