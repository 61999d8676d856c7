//! Adapters that turn business lifecycle events into ledger movements.
//!
//! Each adapter follows the same steps: resolve the location, check the ledger for a
//! movement this event already produced, then call `adjust_guarded`, which repeats
//! that check under the row lock. Replaying an event is therefore always a no-op.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::{
    entities::MovementType,
    errors::ServiceError,
    events::lifecycle::{LifecycleEvent, OrderStatus, ReturnItem, ReturnStatus},
    queries::inventory_queries::{self, Correlation, MovementGuard},
    services::{
        inventory::{AdjustRequest, InventoryService, MovementRecord},
        location_resolver::OrderRef,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// The ledger already holds the movement this event would write.
    AlreadyProcessed,
    /// No sale movement exists to reverse.
    MissingCorrelation,
    /// The status transition does not move stock.
    StatusNotHandled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AdapterOutcome {
    Applied(Vec<MovementRecord>),
    Skipped(SkipReason),
}

impl AdapterOutcome {
    fn skipped(reason: SkipReason, event: &str) -> Self {
        metrics::counter!(
            "inventory_ledger.adapter_skipped",
            1,
            "event" => event.to_string(),
            "reason" => reason.to_string()
        );
        AdapterOutcome::Skipped(reason)
    }

    pub fn movements(&self) -> &[MovementRecord] {
        match self {
            AdapterOutcome::Applied(records) => records,
            AdapterOutcome::Skipped(_) => &[],
        }
    }
}

#[derive(Clone)]
pub struct LifecycleAdapters {
    inventory: Arc<InventoryService>,
}

impl LifecycleAdapters {
    pub fn new(inventory: Arc<InventoryService>) -> Self {
        Self { inventory }
    }

    pub async fn handle(&self, event: &LifecycleEvent) -> Result<AdapterOutcome, ServiceError> {
        match event {
            LifecycleEvent::OrderItemCreated {
                order_id,
                order_item_id,
                variant_id,
                quantity,
                integration_id,
            } => {
                let order = OrderRef {
                    order_id: *order_id,
                    integration_id: integration_id.clone(),
                };
                self.on_order_item_created(&order, *order_item_id, *variant_id, *quantity)
                    .await
            }
            LifecycleEvent::OrderStatusChanged {
                order_id,
                new_status,
            } => self.on_order_status_changed(*order_id, *new_status).await,
            LifecycleEvent::ReturnStatusChanged {
                return_id,
                order_id,
                new_status,
                items,
            } => {
                self.on_return_status_changed(*return_id, *order_id, *new_status, items)
                    .await
            }
            LifecycleEvent::PurchaseOrderItemReceived {
                purchase_order_id,
                purchase_order_item_id,
                variant_id,
                location_id,
                quantity,
            } => {
                self.on_purchase_order_item_received(
                    *purchase_order_id,
                    *purchase_order_item_id,
                    *variant_id,
                    *location_id,
                    *quantity,
                )
                .await
            }
        }
    }

    /// Deducts the ordered quantity at the resolved location.
    #[instrument(skip(self, order), fields(order_id = order.order_id))]
    pub async fn on_order_item_created(
        &self,
        order: &OrderRef,
        order_item_id: Option<i64>,
        variant_id: i64,
        quantity: i64,
    ) -> Result<AdapterOutcome, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "ordered quantity must be positive, got {}",
                quantity
            )));
        }

        let correlation = match order_item_id {
            Some(item) => Correlation::OrderItem(item),
            None => Correlation::Order(order.order_id),
        };
        let guard = MovementGuard::new(MovementType::Sale, correlation, variant_id);

        if let Some(existing) =
            inventory_queries::find_existing_movement(self.inventory.db(), &guard).await?
        {
            info!(
                existing_movement_id = existing.id,
                "Sale already recorded for this order line"
            );
            return Ok(AdapterOutcome::skipped(
                SkipReason::AlreadyProcessed,
                "order_item_created",
            ));
        }

        let location = self
            .inventory
            .resolve_location_for_order(order, variant_id)
            .await?;

        let request = AdjustRequest::new(variant_id, location.id, -quantity, MovementType::Sale)
            .with_order(order.order_id)
            .with_order_item(order_item_id)
            .with_reference(format!("Order #{}", order.order_id));

        Ok(match self.inventory.adjust_guarded(request, Some(&guard)).await? {
            Some(record) => AdapterOutcome::Applied(vec![record]),
            None => AdapterOutcome::skipped(SkipReason::AlreadyProcessed, "order_item_created"),
        })
    }

    /// Reverses every sale of a cancelled or rejected order at the location it was taken from.
    #[instrument(skip(self))]
    pub async fn on_order_status_changed(
        &self,
        order_id: i64,
        new_status: OrderStatus,
    ) -> Result<AdapterOutcome, ServiceError> {
        if !new_status.releases_stock() {
            return Ok(AdapterOutcome::skipped(
                SkipReason::StatusNotHandled,
                "order_status_changed",
            ));
        }

        let sales = inventory_queries::sale_movements_for_order(self.inventory.db(), order_id).await?;
        if sales.is_empty() {
            info!(order_id, "No sale movement recorded for order; nothing to reverse");
            return Ok(AdapterOutcome::skipped(
                SkipReason::MissingCorrelation,
                "order_status_changed",
            ));
        }

        // Net sold quantity per (variant, location). BTreeMap keeps lock order stable.
        let mut sold: BTreeMap<(i64, i64), i64> = BTreeMap::new();
        for sale in &sales {
            *sold.entry((sale.variant_id, sale.location_id)).or_default() += sale.quantity;
        }

        let mut applied = Vec::new();
        for ((variant_id, location_id), net) in sold {
            let restore = -net;
            if restore <= 0 {
                continue;
            }

            let guard = MovementGuard::new(
                MovementType::Cancellation,
                Correlation::Order(order_id),
                variant_id,
            )
            .at_location(location_id);

            if let Some(existing) =
                inventory_queries::find_existing_movement(self.inventory.db(), &guard).await?
            {
                info!(
                    existing_movement_id = existing.id,
                    variant_id,
                    location_id,
                    "Cancellation already recorded for this order"
                );
                continue;
            }

            let request =
                AdjustRequest::new(variant_id, location_id, restore, MovementType::Cancellation)
                    .with_order(order_id)
                    .with_reference(format!("Order #{} {}", order_id, new_status));

            if let Some(record) = self.inventory.adjust_guarded(request, Some(&guard)).await? {
                applied.push(record);
            }
        }

        if applied.is_empty() {
            Ok(AdapterOutcome::skipped(
                SkipReason::AlreadyProcessed,
                "order_status_changed",
            ))
        } else {
            Ok(AdapterOutcome::Applied(applied))
        }
    }

    /// Restocks each returned line once the return completes.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn on_return_status_changed(
        &self,
        return_id: i64,
        order_id: i64,
        new_status: ReturnStatus,
        items: &[ReturnItem],
    ) -> Result<AdapterOutcome, ServiceError> {
        if new_status != ReturnStatus::Completed {
            return Ok(AdapterOutcome::skipped(
                SkipReason::StatusNotHandled,
                "return_status_changed",
            ));
        }

        // Lines for the same order line are one restock; the guard allows one per line.
        let mut returned: BTreeMap<(i64, Option<i64>), i64> = BTreeMap::new();
        for item in items {
            if item.quantity <= 0 {
                warn!(
                    variant_id = item.variant_id,
                    quantity = item.quantity,
                    "Ignoring return line without a positive quantity"
                );
                continue;
            }
            let total = returned
                .entry((item.variant_id, item.order_item_id))
                .or_default();
            *total = total.checked_add(item.quantity).ok_or_else(|| {
                ServiceError::InvalidDelta(format!(
                    "returned quantity for variant {} overflows",
                    item.variant_id
                ))
            })?;
        }

        let mut applied = Vec::new();
        for ((variant_id, order_item_id), quantity) in returned {
            let guard = MovementGuard::new(
                MovementType::Return,
                Correlation::Return {
                    return_id,
                    order_item_id,
                },
                variant_id,
            );

            if let Some(existing) =
                inventory_queries::find_existing_movement(self.inventory.db(), &guard).await?
            {
                info!(
                    existing_movement_id = existing.id,
                    variant_id,
                    ?order_item_id,
                    "Return already restocked for this line"
                );
                continue;
            }

            let location_id = match inventory_queries::sale_location_for(
                self.inventory.db(),
                order_id,
                order_item_id,
                variant_id,
            )
            .await?
            {
                Some(location_id) => location_id,
                None => {
                    let fallback = self
                        .inventory
                        .resolver()
                        .highest_stock_or_default(variant_id)
                        .await?;
                    info!(
                        order_id,
                        variant_id,
                        location = %fallback.code,
                        "No sale movement for returned line; restocking at fallback location"
                    );
                    fallback.id
                }
            };

            let request = AdjustRequest::new(variant_id, location_id, quantity, MovementType::Return)
                .with_order(order_id)
                .with_order_item(order_item_id)
                .with_return(return_id)
                .with_reference(format!("Return #{}", return_id));

            if let Some(record) = self.inventory.adjust_guarded(request, Some(&guard)).await? {
                applied.push(record);
            }
        }

        if applied.is_empty() {
            Ok(AdapterOutcome::skipped(
                SkipReason::AlreadyProcessed,
                "return_status_changed",
            ))
        } else {
            Ok(AdapterOutcome::Applied(applied))
        }
    }

    /// Adds received purchase-order stock, at the named location or the default one.
    #[instrument(skip(self))]
    pub async fn on_purchase_order_item_received(
        &self,
        purchase_order_id: i64,
        purchase_order_item_id: i64,
        variant_id: i64,
        location_id: Option<i64>,
        quantity: i64,
    ) -> Result<AdapterOutcome, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "received quantity must be positive, got {}",
                quantity
            )));
        }

        let guard = MovementGuard::new(
            MovementType::PurchaseReceived,
            Correlation::PurchaseOrderItem(purchase_order_item_id),
            variant_id,
        );
        if inventory_queries::find_existing_movement(self.inventory.db(), &guard)
            .await?
            .is_some()
        {
            return Ok(AdapterOutcome::skipped(
                SkipReason::AlreadyProcessed,
                "purchase_order_item_received",
            ));
        }

        let location_id = match location_id {
            Some(id) => id,
            None => self.inventory.resolver().default_location().await?.id,
        };

        let request =
            AdjustRequest::new(variant_id, location_id, quantity, MovementType::PurchaseReceived)
                .with_purchase_order_item(purchase_order_item_id)
                .with_reference(format!("PO #{}", purchase_order_id));

        Ok(match self.inventory.adjust_guarded(request, Some(&guard)).await? {
            Some(record) => AdapterOutcome::Applied(vec![record]),
            None => AdapterOutcome::skipped(
                SkipReason::AlreadyProcessed,
                "purchase_order_item_received",
            ),
        })
    }
}
