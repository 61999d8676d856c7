use std::collections::BTreeSet;
use std::sync::Arc;

use sea_orm::{DatabaseConnection, EntityTrait};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::{
    entities::{inventory_movement::Model as MovementModel, product_variant::Entity as ProductVariantEntity},
    errors::ServiceError,
    queries::inventory_queries,
};

/// Adjacent movements on one (location, variant) pair whose snapshots disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainBreak {
    pub movement_id: i64,
    pub expected_before: i64,
    pub actual_before: i64,
    pub quantity: i64,
    pub actual_after: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationReconciliation {
    pub location_id: i64,
    /// Current `location_inventory.quantity`; 0 when the row is missing.
    pub projection_quantity: i64,
    pub ledger_quantity: i64,
    pub movement_count: usize,
    pub chain_breaks: Vec<ChainBreak>,
}

impl LocationReconciliation {
    pub fn is_consistent(&self) -> bool {
        self.projection_quantity == self.ledger_quantity && self.chain_breaks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantReconciliation {
    pub variant_id: i64,
    pub sku: String,
    pub cached_total: i64,
    pub derived_total: i64,
    pub locations: Vec<LocationReconciliation>,
}

impl VariantReconciliation {
    pub fn is_consistent(&self) -> bool {
        self.cached_total == self.derived_total
            && self.locations.iter().all(LocationReconciliation::is_consistent)
    }
}

/// Walks a pair's movements in write order and reports every broken link.
///
/// A link is broken when a movement's `quantity_before` differs from the previous
/// movement's `quantity_after` (the first movement must start at 0), or when
/// `quantity_after != quantity_before + quantity`.
pub fn check_chain(movements: &[MovementModel]) -> Vec<ChainBreak> {
    let mut breaks = Vec::new();
    let mut expected_before = 0i64;

    for movement in movements {
        let arithmetic_ok =
            movement.quantity_before.checked_add(movement.quantity) == Some(movement.quantity_after);
        if movement.quantity_before != expected_before || !arithmetic_ok {
            breaks.push(ChainBreak {
                movement_id: movement.id,
                expected_before,
                actual_before: movement.quantity_before,
                quantity: movement.quantity,
                actual_after: movement.quantity_after,
            });
        }
        expected_before = movement.quantity_after;
    }

    breaks
}

/// Read-only audit of the projection and aggregate against the movement ledger.
#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
}

impl ReconciliationService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn reconcile(&self, variant_id: i64) -> Result<VariantReconciliation, ServiceError> {
        let db = &*self.db;

        let variant = ProductVariantEntity::find_by_id(variant_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", variant_id)))?;

        let projections = inventory_queries::projections_for_variant(db, variant_id).await?;
        let mut location_ids: BTreeSet<i64> = projections.iter().map(|p| p.location_id).collect();
        location_ids.extend(inventory_queries::locations_with_movements(db, variant_id).await?);

        let mut locations = Vec::with_capacity(location_ids.len());
        for location_id in location_ids {
            let movements = inventory_queries::movement_chain(db, variant_id, location_id).await?;
            let projection_quantity = projections
                .iter()
                .find(|p| p.location_id == location_id)
                .map_or(0, |p| p.quantity);

            locations.push(LocationReconciliation {
                location_id,
                projection_quantity,
                ledger_quantity: movements.iter().map(|m| m.quantity).sum(),
                movement_count: movements.len(),
                chain_breaks: check_chain(&movements),
            });
        }

        let report = VariantReconciliation {
            variant_id,
            sku: variant.sku,
            cached_total: variant.total_quantity,
            derived_total: projections.iter().map(|p| p.quantity).sum(),
            locations,
        };

        if report.is_consistent() {
            info!(variant_id, sku = %report.sku, "Ledger reconciles");
        } else {
            metrics::counter!("inventory_ledger.reconciliation_mismatches", 1);
            warn!(
                variant_id,
                sku = %report.sku,
                cached_total = report.cached_total,
                derived_total = report.derived_total,
                "Ledger does not reconcile"
            );
        }

        Ok(report)
    }

    /// Reconciles every variant, oldest id first.
    pub async fn reconcile_all(&self) -> Result<Vec<VariantReconciliation>, ServiceError> {
        let variant_ids = inventory_queries::all_variant_ids(&*self.db).await?;
        let mut reports = Vec::with_capacity(variant_ids.len());
        for variant_id in variant_ids {
            reports.push(self.reconcile(variant_id).await?);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::MovementType;
    use chrono::Utc;

    fn movement(id: i64, before: i64, quantity: i64, after: i64) -> MovementModel {
        MovementModel {
            id,
            variant_id: 1,
            location_id: 1,
            movement_type: MovementType::Adjustment,
            quantity,
            quantity_before: before,
            quantity_after: after,
            order_id: None,
            order_item_id: None,
            return_id: None,
            purchase_order_item_id: None,
            reference: None,
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn intact_chain_has_no_breaks() {
        let chain = vec![movement(1, 0, 20, 20), movement(2, 20, -5, 15), movement(3, 15, -3, 12)];
        assert!(check_chain(&chain).is_empty());
    }

    #[test]
    fn detects_fork_where_two_movements_claim_the_same_before() {
        let chain = vec![movement(1, 0, 20, 20), movement(2, 20, -5, 15), movement(3, 20, -3, 17)];
        let breaks = check_chain(&chain);
        assert_eq!(breaks.len(), 1);
        assert_eq!(breaks[0].movement_id, 3);
        assert_eq!(breaks[0].expected_before, 15);
    }

    #[test]
    fn detects_bad_arithmetic() {
        let chain = vec![movement(1, 0, 5, 6)];
        assert_eq!(check_chain(&chain)[0].actual_after, 6);
    }
}
