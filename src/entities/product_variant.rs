use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Sellable product variant.
///
/// `total_quantity` is the cached sum of `location_inventory.quantity` across all
/// locations. It is derived, never authoritative, and rewritten by the ledger on
/// every movement.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "product_variants")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub sku: String,
    pub name: String,
    pub total_quantity: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::location_inventory::Entity")]
    LocationInventory,
    #[sea_orm(has_many = "super::inventory_movement::Entity")]
    InventoryMovements,
}

impl Related<super::location_inventory::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LocationInventory.def()
    }
}

impl Related<super::inventory_movement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryMovements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
