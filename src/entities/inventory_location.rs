use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A physical or logical stock-holding place (warehouse, store).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "locations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    #[sea_orm(unique)]
    pub code: String,
    pub is_active: bool,
    pub is_default: bool,
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
