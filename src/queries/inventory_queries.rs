use crate::{
    entities::{
        inventory_location::{self, Entity as Location, Model as LocationModel},
        inventory_movement::{self, Entity as InventoryMovement, Model as InventoryMovementModel},
        location_inventory::{self, Entity as LocationInventory, Model as LocationInventoryModel},
        product_variant::{self, Entity as ProductVariant},
        MovementType,
    },
    errors::ServiceError,
};
use async_trait::async_trait;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait Query: Send + Sync {
    type Result: Send + Sync;

    async fn execute<C>(&self, conn: &C) -> Result<Self::Result, ServiceError>
    where
        C: ConnectionTrait;
}

/// Business reference a movement is deduplicated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Correlation {
    OrderItem(i64),
    Order(i64),
    Return {
        return_id: i64,
        order_item_id: Option<i64>,
    },
    PurchaseOrderItem(i64),
}

/// Identifies the single movement a lifecycle event is allowed to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementGuard {
    pub movement_type: MovementType,
    pub correlation: Correlation,
    pub variant_id: i64,
    /// Narrows the guard to one location, for reversals split across locations.
    pub location_id: Option<i64>,
}

impl MovementGuard {
    pub fn new(movement_type: MovementType, correlation: Correlation, variant_id: i64) -> Self {
        Self {
            movement_type,
            correlation,
            variant_id,
            location_id: None,
        }
    }

    pub fn at_location(mut self, location_id: i64) -> Self {
        self.location_id = Some(location_id);
        self
    }
}

/// Returns the earliest movement already written for `guard`, if any.
///
/// The ledger's only duplicate-detection query. Correlation columns are indexed
/// together with `movement_type`.
pub async fn find_existing_movement<C>(
    conn: &C,
    guard: &MovementGuard,
) -> Result<Option<InventoryMovementModel>, ServiceError>
where
    C: ConnectionTrait,
{
    let mut query = InventoryMovement::find()
        .filter(inventory_movement::Column::MovementType.eq(guard.movement_type))
        .filter(inventory_movement::Column::VariantId.eq(guard.variant_id));

    query = match guard.correlation {
        Correlation::OrderItem(order_item_id) => {
            query.filter(inventory_movement::Column::OrderItemId.eq(order_item_id))
        }
        Correlation::Order(order_id) => {
            query.filter(inventory_movement::Column::OrderId.eq(order_id))
        }
        Correlation::Return {
            return_id,
            order_item_id,
        } => {
            let query = query.filter(inventory_movement::Column::ReturnId.eq(return_id));
            match order_item_id {
                Some(item) => query.filter(inventory_movement::Column::OrderItemId.eq(item)),
                None => query,
            }
        }
        Correlation::PurchaseOrderItem(po_item_id) => {
            query.filter(inventory_movement::Column::PurchaseOrderItemId.eq(po_item_id))
        }
    };

    if let Some(location_id) = guard.location_id {
        query = query.filter(inventory_movement::Column::LocationId.eq(location_id));
    }

    query
        .order_by_asc(inventory_movement::Column::Id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Sale movements recorded for an order, oldest first.
pub async fn sale_movements_for_order<C>(
    conn: &C,
    order_id: i64,
) -> Result<Vec<InventoryMovementModel>, ServiceError>
where
    C: ConnectionTrait,
{
    InventoryMovement::find()
        .filter(inventory_movement::Column::OrderId.eq(order_id))
        .filter(inventory_movement::Column::MovementType.eq(MovementType::Sale))
        .order_by_asc(inventory_movement::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Location of the first Sale movement for (order, variant).
///
/// With an order item id the sale of that line wins; any sale of the variant on the
/// order is used when the line has none.
pub async fn sale_location_for<C>(
    conn: &C,
    order_id: i64,
    order_item_id: Option<i64>,
    variant_id: i64,
) -> Result<Option<i64>, ServiceError>
where
    C: ConnectionTrait,
{
    let sales = || {
        InventoryMovement::find()
            .filter(inventory_movement::Column::OrderId.eq(order_id))
            .filter(inventory_movement::Column::VariantId.eq(variant_id))
            .filter(inventory_movement::Column::MovementType.eq(MovementType::Sale))
            .order_by_asc(inventory_movement::Column::Id)
    };

    if let Some(order_item_id) = order_item_id {
        let line_sale = sales()
            .filter(inventory_movement::Column::OrderItemId.eq(order_item_id))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?;
        if let Some(movement) = line_sale {
            return Ok(Some(movement.location_id));
        }
    }

    let movement = sales().one(conn).await.map_err(ServiceError::db_error)?;
    Ok(movement.map(|m| m.location_id))
}

/// Every movement on a (location, variant) pair in write order.
pub async fn movement_chain<C>(
    conn: &C,
    variant_id: i64,
    location_id: i64,
) -> Result<Vec<InventoryMovementModel>, ServiceError>
where
    C: ConnectionTrait,
{
    InventoryMovement::find()
        .filter(inventory_movement::Column::VariantId.eq(variant_id))
        .filter(inventory_movement::Column::LocationId.eq(location_id))
        .order_by_asc(inventory_movement::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Distinct locations that have ever recorded a movement for `variant_id`.
pub async fn locations_with_movements<C>(
    conn: &C,
    variant_id: i64,
) -> Result<Vec<i64>, ServiceError>
where
    C: ConnectionTrait,
{
    InventoryMovement::find()
        .select_only()
        .column(inventory_movement::Column::LocationId)
        .distinct()
        .filter(inventory_movement::Column::VariantId.eq(variant_id))
        .order_by_asc(inventory_movement::Column::LocationId)
        .into_tuple::<i64>()
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

pub async fn projections_for_variant<C>(
    conn: &C,
    variant_id: i64,
) -> Result<Vec<LocationInventoryModel>, ServiceError>
where
    C: ConnectionTrait,
{
    LocationInventory::find()
        .filter(location_inventory::Column::VariantId.eq(variant_id))
        .order_by_asc(location_inventory::Column::LocationId)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Sum of projection quantities for a variant.
///
/// Summed client-side; Postgres widens `SUM(bigint)` to `numeric`.
pub async fn sum_variant_quantity<C>(conn: &C, variant_id: i64) -> Result<i64, ServiceError>
where
    C: ConnectionTrait,
{
    let quantities = LocationInventory::find()
        .select_only()
        .column(location_inventory::Column::Quantity)
        .filter(location_inventory::Column::VariantId.eq(variant_id))
        .into_tuple::<i64>()
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(quantities.into_iter().sum())
}

/// Active location holding the most stock (> 0) of a variant. Ties go to the lowest id.
pub async fn highest_stock_location<C>(
    conn: &C,
    variant_id: i64,
) -> Result<Option<LocationModel>, ServiceError>
where
    C: ConnectionTrait,
{
    let row = LocationInventory::find()
        .find_also_related(Location)
        .filter(location_inventory::Column::VariantId.eq(variant_id))
        .filter(location_inventory::Column::Quantity.gt(0))
        .filter(inventory_location::Column::IsActive.eq(true))
        .order_by_desc(location_inventory::Column::Quantity)
        .order_by_asc(location_inventory::Column::LocationId)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(row.and_then(|(_, location)| location))
}

/// The default active location, else the lowest-id active location.
pub async fn fallback_location<C>(conn: &C) -> Result<Option<LocationModel>, ServiceError>
where
    C: ConnectionTrait,
{
    Location::find()
        .filter(inventory_location::Column::IsActive.eq(true))
        .order_by_desc(inventory_location::Column::IsDefault)
        .order_by_asc(inventory_location::Column::Id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

pub async fn active_location_by_code<C>(
    conn: &C,
    code: &str,
) -> Result<Option<LocationModel>, ServiceError>
where
    C: ConnectionTrait,
{
    Location::find()
        .filter(inventory_location::Column::Code.eq(code))
        .filter(inventory_location::Column::IsActive.eq(true))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

pub async fn all_variant_ids<C>(conn: &C) -> Result<Vec<i64>, ServiceError>
where
    C: ConnectionTrait,
{
    ProductVariant::find()
        .select_only()
        .column(product_variant::Column::Id)
        .order_by_asc(product_variant::Column::Id)
        .into_tuple::<i64>()
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Current per-location quantity for one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockLevel {
    pub location_id: i64,
    pub location_code: Option<String>,
    pub quantity: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetStockLevelsQuery {
    pub variant_id: i64,
}

#[async_trait]
impl Query for GetStockLevelsQuery {
    type Result = Vec<StockLevel>;

    async fn execute<C>(&self, conn: &C) -> Result<Self::Result, ServiceError>
    where
        C: ConnectionTrait,
    {
        let rows = LocationInventory::find()
            .find_also_related(Location)
            .filter(location_inventory::Column::VariantId.eq(self.variant_id))
            .order_by_asc(location_inventory::Column::LocationId)
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(rows
            .into_iter()
            .map(|(row, location)| StockLevel {
                location_id: row.location_id,
                location_code: location.map(|l| l.code),
                quantity: row.quantity,
            })
            .collect())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetMovementHistoryQuery {
    pub variant_id: i64,
    pub location_id: Option<i64>,
    pub limit: u64,
}

#[async_trait]
impl Query for GetMovementHistoryQuery {
    type Result = Vec<InventoryMovementModel>;

    async fn execute<C>(&self, conn: &C) -> Result<Self::Result, ServiceError>
    where
        C: ConnectionTrait,
    {
        let mut query =
            InventoryMovement::find().filter(inventory_movement::Column::VariantId.eq(self.variant_id));
        if let Some(location_id) = self.location_id {
            query = query.filter(inventory_movement::Column::LocationId.eq(location_id));
        }

        query
            .order_by_desc(inventory_movement::Column::Id)
            .limit(self.limit)
            .all(conn)
            .await
            .map_err(ServiceError::db_error)
    }
}
