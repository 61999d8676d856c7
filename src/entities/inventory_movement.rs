use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Why stock moved. Descriptive only; the arithmetic
/// `quantity_after = quantity_before + quantity` holds for every type.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    #[sea_orm(string_value = "sale")]
    Sale,
    #[sea_orm(string_value = "return")]
    Return,
    #[sea_orm(string_value = "cancellation")]
    Cancellation,
    #[sea_orm(string_value = "adjustment")]
    Adjustment,
    #[sea_orm(string_value = "purchase_received")]
    PurchaseReceived,
}

/// Expected sign of the delta for a movement type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignConvention {
    Negative,
    Positive,
    Either,
}

impl SignConvention {
    pub fn permits(self, delta: i64) -> bool {
        match self {
            SignConvention::Negative => delta < 0,
            SignConvention::Positive => delta > 0,
            SignConvention::Either => delta != 0,
        }
    }
}

impl MovementType {
    pub fn sign_convention(self) -> SignConvention {
        match self {
            MovementType::Sale => SignConvention::Negative,
            MovementType::Return | MovementType::Cancellation | MovementType::PurchaseReceived => {
                SignConvention::Positive
            }
            MovementType::Adjustment => SignConvention::Either,
        }
    }
}

/// One immutable, signed quantity change against a (location, variant) pair.
///
/// Rows are insert-only. Reversals are new rows with the opposite sign.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_movements")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub variant_id: i64,
    pub location_id: i64,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub order_id: Option<i64>,
    pub order_item_id: Option<i64>,
    pub return_id: Option<i64>,
    pub purchase_order_item_id: Option<i64>,
    pub reference: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::inventory_location::Entity",
        from = "Column::LocationId",
        to = "super::inventory_location::Column::Id"
    )]
    Location,
    #[sea_orm(
        belongs_to = "super::product_variant::Entity",
        from = "Column::VariantId",
        to = "super::product_variant::Column::Id"
    )]
    Variant,
}

impl Related<super::inventory_location::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Location.def()
    }
}

impl Related<super::product_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Variant.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if !insert {
            return Err(DbErr::Custom(
                "inventory movements are append-only and cannot be updated".to_string(),
            ));
        }
        Ok(self)
    }

    async fn before_delete<C>(self, _db: &C) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        Err(DbErr::Custom(
            "inventory movements are append-only and cannot be deleted".to_string(),
        ))
    }
}
