use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::AppConfig,
    db,
    entities::{
        inventory_location::{Entity as LocationEntity, Model as LocationModel},
        inventory_movement::{self, Model as MovementModel},
        location_inventory::{self, Entity as LocationInventoryEntity},
        product_variant::Entity as ProductVariantEntity,
        MovementType,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    queries::{
        inventory_queries::{
            self, GetMovementHistoryQuery, GetStockLevelsQuery, MovementGuard, StockLevel,
        },
        Query,
    },
    services::{
        inventory_sync::{self, AggregateSync, InventorySyncService},
        location_resolver::{
            IntegrationDirectory, LocationResolver, OrderRef, StaticIntegrationDirectory,
        },
    },
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Business identifiers a movement is tied back to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementLinks {
    pub order_id: Option<i64>,
    pub order_item_id: Option<i64>,
    pub return_id: Option<i64>,
    pub purchase_order_item_id: Option<i64>,
}

/// One signed change to apply to a (location, variant) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustRequest {
    pub variant_id: i64,
    pub location_id: i64,
    pub quantity: i64,
    pub movement_type: MovementType,
    pub links: MovementLinks,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl AdjustRequest {
    pub fn new(variant_id: i64, location_id: i64, quantity: i64, movement_type: MovementType) -> Self {
        Self {
            variant_id,
            location_id,
            quantity,
            movement_type,
            links: MovementLinks::default(),
            reference: None,
            notes: None,
        }
    }

    pub fn with_order(mut self, order_id: i64) -> Self {
        self.links.order_id = Some(order_id);
        self
    }

    pub fn with_order_item(mut self, order_item_id: Option<i64>) -> Self {
        self.links.order_item_id = order_item_id;
        self
    }

    pub fn with_return(mut self, return_id: i64) -> Self {
        self.links.return_id = Some(return_id);
        self
    }

    pub fn with_purchase_order_item(mut self, purchase_order_item_id: i64) -> Self {
        self.links.purchase_order_item_id = Some(purchase_order_item_id);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }
}

/// A committed movement plus the context it was written in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovementRecord {
    pub movement: MovementModel,
    pub sku: String,
    pub location_code: String,
    /// Variant aggregate after this movement committed.
    pub variant_total: i64,
}

impl MovementRecord {
    pub fn quantity_before(&self) -> i64 {
        self.movement.quantity_before
    }

    pub fn quantity_after(&self) -> i64 {
        self.movement.quantity_after
    }

    pub fn is_oversold(&self) -> bool {
        self.movement.quantity_after < 0
    }
}

/// The only writer of location stock, the movement ledger and the variant aggregate.
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
    integrations: Arc<dyn IntegrationDirectory>,
    lock_timeout: Duration,
}

impl InventoryService {
    /// Creates a new inventory service instance
    pub fn new(db_pool: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
            integrations: Arc::new(StaticIntegrationDirectory::default()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn from_config(
        db_pool: Arc<DatabaseConnection>,
        event_sender: Option<EventSender>,
        config: &AppConfig,
    ) -> Self {
        Self::new(db_pool, event_sender)
            .with_lock_timeout(config.lock_timeout())
            .with_integration_directory(Arc::new(StaticIntegrationDirectory::from_config(config)))
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_integration_directory(mut self, integrations: Arc<dyn IntegrationDirectory>) -> Self {
        self.integrations = integrations;
        self
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db_pool
    }

    pub fn resolver(&self) -> LocationResolver {
        LocationResolver::new(self.db_pool.clone(), self.integrations.clone())
    }

    fn sync_service(&self) -> InventorySyncService {
        InventorySyncService::new(
            self.db_pool.clone(),
            self.event_sender.clone(),
            self.lock_timeout,
        )
    }

    /// Applies `request` atomically and returns the written movement.
    pub async fn adjust(&self, request: AdjustRequest) -> Result<MovementRecord, ServiceError> {
        self.adjust_guarded(request, None).await?.ok_or_else(|| {
            ServiceError::InternalError("unguarded adjustment wrote no movement".to_string())
        })
    }

    /// Like [`adjust`](Self::adjust), but first re-checks `guard` while holding the row
    /// lock. Returns `None` when a matching movement already exists.
    #[instrument(
        skip(self, request, guard),
        fields(
            variant_id = request.variant_id,
            location_id = request.location_id,
            delta = request.quantity,
            movement_type = %request.movement_type
        )
    )]
    pub async fn adjust_guarded(
        &self,
        request: AdjustRequest,
        guard: Option<&MovementGuard>,
    ) -> Result<Option<MovementRecord>, ServiceError> {
        if request.quantity == 0 {
            return Err(ServiceError::InvalidDelta(
                "quantity cannot be zero".to_string(),
            ));
        }
        if !request.movement_type.sign_convention().permits(request.quantity) {
            debug!("Delta sign is unusual for this movement type");
        }

        let started = Instant::now();
        let txn = db::begin_with_lock_timeout(&self.db_pool, self.lock_timeout).await?;

        let variant = ProductVariantEntity::find_by_id(request.variant_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Variant {} not found", request.variant_id))
            })?;
        let location = LocationEntity::find_by_id(request.location_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Location {} not found", request.location_id))
            })?;

        let projection = lock_projection(&txn, location.id, variant.id).await?;

        if let Some(guard) = guard {
            if let Some(existing) = inventory_queries::find_existing_movement(&txn, guard).await? {
                txn.rollback().await.map_err(ServiceError::db_error)?;
                info!(
                    existing_movement_id = existing.id,
                    "Matching movement already recorded; nothing written"
                );
                return Ok(None);
            }
        }

        let quantity_before = projection.quantity;
        let quantity_after = quantity_before.checked_add(request.quantity).ok_or_else(|| {
            ServiceError::InvalidDelta(format!(
                "delta {} overflows stock of {}",
                request.quantity, quantity_before
            ))
        })?;
        let now = Utc::now();

        let mut active: location_inventory::ActiveModel = projection.into();
        active.quantity = Set(quantity_after);
        active.updated_at = Set(now);
        active.update(&txn).await.map_err(|e| {
            error!("Failed to update location inventory: {}", e);
            ServiceError::db_error(e)
        })?;

        let movement = inventory_movement::ActiveModel {
            variant_id: Set(variant.id),
            location_id: Set(location.id),
            movement_type: Set(request.movement_type),
            quantity: Set(request.quantity),
            quantity_before: Set(quantity_before),
            quantity_after: Set(quantity_after),
            order_id: Set(request.links.order_id),
            order_item_id: Set(request.links.order_item_id),
            return_id: Set(request.links.return_id),
            purchase_order_item_id: Set(request.links.purchase_order_item_id),
            reference: Set(request.reference),
            notes: Set(request.notes),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!("Failed to append inventory movement: {}", e);
            ServiceError::db_error(e)
        })?;

        let aggregate = inventory_sync::sync_variant_total(&txn, variant.id).await?;

        txn.commit().await.map_err(|e| {
            error!("Failed to commit inventory adjustment: {}", e);
            ServiceError::db_error(e)
        })?;

        let record = MovementRecord {
            movement,
            sku: variant.sku,
            location_code: location.code,
            variant_total: aggregate.current_total,
        };
        self.emit_signals(&record, started.elapsed());

        Ok(Some(record))
    }

    fn emit_signals(&self, record: &MovementRecord, elapsed: Duration) {
        let movement = &record.movement;

        info!(
            target: "inventory_audit",
            movement_id = movement.id,
            sku = %record.sku,
            location = %record.location_code,
            movement_type = %movement.movement_type,
            delta = movement.quantity,
            before = movement.quantity_before,
            after = movement.quantity_after,
            order_id = ?movement.order_id,
            return_id = ?movement.return_id,
            variant_total = record.variant_total,
            "Inventory movement recorded"
        );
        metrics::counter!(
            "inventory_ledger.movements",
            1,
            "movement_type" => movement.movement_type.to_string()
        );
        metrics::histogram!("inventory_ledger.adjust.duration", elapsed.as_secs_f64());

        if record.is_oversold() {
            warn!(
                target: "inventory_audit",
                movement_id = movement.id,
                sku = %record.sku,
                location = %record.location_code,
                quantity = movement.quantity_after,
                "Location stock went negative (oversold)"
            );
            metrics::counter!("inventory_ledger.negative_stock", 1);
        }

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::StockMovementRecorded {
                    movement_id: movement.id,
                    variant_id: movement.variant_id,
                    location_id: movement.location_id,
                    movement_type: movement.movement_type,
                    quantity: movement.quantity,
                    quantity_before: movement.quantity_before,
                    quantity_after: movement.quantity_after,
                    variant_total: record.variant_total,
                    order_id: movement.order_id,
                    return_id: movement.return_id,
                });
            if record.is_oversold() {
                sender
                    .send_or_log(Event::NegativeStockDetected {
                        variant_id: movement.variant_id,
                        location_id: movement.location_id,
                        quantity: movement.quantity_after,
                        movement_id: movement.id,
                    });
            }
        }
    }

    /// Recomputes and persists the variant aggregate; returns the new total.
    pub async fn resync(&self, variant_id: i64) -> Result<i64, ServiceError> {
        Ok(self.sync_service().resync(variant_id).await?.current_total)
    }

    pub async fn resync_all(&self) -> Result<Vec<AggregateSync>, ServiceError> {
        self.sync_service().resync_all().await
    }

    pub async fn resolve_location_for_order(
        &self,
        order: &OrderRef,
        variant_id: i64,
    ) -> Result<LocationModel, ServiceError> {
        self.resolver().resolve_for_order(order, variant_id).await
    }

    #[instrument(skip(self))]
    pub async fn stock_levels(&self, variant_id: i64) -> Result<Vec<StockLevel>, ServiceError> {
        GetStockLevelsQuery { variant_id }
            .execute(&*self.db_pool)
            .await
    }

    /// Newest first.
    #[instrument(skip(self))]
    pub async fn movement_history(
        &self,
        variant_id: i64,
        location_id: Option<i64>,
        limit: u64,
    ) -> Result<Vec<MovementModel>, ServiceError> {
        GetMovementHistoryQuery {
            variant_id,
            location_id,
            limit,
        }
        .execute(&*self.db_pool)
        .await
    }

    /// Cached variant aggregate as stored.
    pub async fn variant_total(&self, variant_id: i64) -> Result<i64, ServiceError> {
        ProductVariantEntity::find_by_id(variant_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .map(|v| v.total_quantity)
            .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", variant_id)))
    }
}

/// Ensures the projection row exists, then takes its row lock.
async fn lock_projection(
    txn: &DatabaseTransaction,
    location_id: i64,
    variant_id: i64,
) -> Result<location_inventory::Model, ServiceError> {
    let now = Utc::now();
    let seed = location_inventory::ActiveModel {
        location_id: Set(location_id),
        variant_id: Set(variant_id),
        quantity: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    LocationInventoryEntity::insert(seed)
        .on_conflict(
            OnConflict::columns([
                location_inventory::Column::LocationId,
                location_inventory::Column::VariantId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(txn)
        .await
        .map_err(ServiceError::db_error)?;

    LocationInventoryEntity::find()
        .filter(location_inventory::Column::LocationId.eq(location_id))
        .filter(location_inventory::Column::VariantId.eq(variant_id))
        .lock_exclusive()
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| {
            ServiceError::InternalError(format!(
                "projection row for location {} variant {} vanished under lock",
                location_id, variant_id
            ))
        })
}
