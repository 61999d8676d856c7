mod common;

use chrono::Utc;
use common::{TestLedger, TwoWarehouses};
use sea_orm::{sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use stateset_ledger::{
    entities::{inventory_movement, location_inventory, product_variant, MovementType},
    events::Event,
    services::{inventory::AdjustRequest, location_resolver::OrderRef},
};

async fn overwrite_total(ledger: &TestLedger, variant_id: i64, total: i64) {
    product_variant::Entity::update_many()
        .col_expr(product_variant::Column::TotalQuantity, Expr::value(total))
        .filter(product_variant::Column::Id.eq(variant_id))
        .exec(&*ledger.state.db)
        .await
        .unwrap();
}

#[tokio::test]
async fn ledger_reconciles_after_normal_activity() {
    let fx = TwoWarehouses::new().await;
    let adapters = &fx.ledger.state.adapters;
    adapters
        .on_order_item_created(&OrderRef::new(42), Some(1), fx.variant, 10)
        .await
        .unwrap();
    adapters
        .on_purchase_order_item_received(9, 1, fx.variant, Some(fx.warehouse_b), 12)
        .await
        .unwrap();

    let report = fx
        .ledger
        .state
        .reconciliation_service()
        .reconcile(fx.variant)
        .await
        .unwrap();

    assert!(report.is_consistent());
    assert_eq!(report.cached_total, 152);
    assert_eq!(report.derived_total, 152);
    assert_eq!(report.locations.len(), 2);
    let at_a = report
        .locations
        .iter()
        .find(|l| l.location_id == fx.warehouse_a)
        .unwrap();
    assert_eq!(at_a.movement_count, 2);
    assert_eq!(at_a.ledger_quantity, 90);
}

#[tokio::test]
async fn drifted_total_is_reported_and_resync_repairs_it() {
    let fx = TwoWarehouses::new().await;
    overwrite_total(&fx.ledger, fx.variant, 999).await;
    let reconciliation = fx.ledger.state.reconciliation_service();

    let before = reconciliation.reconcile(fx.variant).await.unwrap();
    assert!(!before.is_consistent());
    assert_eq!(before.cached_total, 999);
    assert_eq!(before.derived_total, 150);
    assert!(before.locations.iter().all(|l| l.is_consistent()));

    let total = fx.ledger.state.inventory.resync(fx.variant).await.unwrap();
    assert_eq!(total, 150);
    assert!(reconciliation.reconcile(fx.variant).await.unwrap().is_consistent());

    let events = fx.ledger.recorded_events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        Event::VariantAggregateResynced {
            previous_total: 999,
            current_total: 150,
            ..
        }
    )));
}

#[tokio::test]
async fn next_adjust_also_repairs_a_drifted_total() {
    let fx = TwoWarehouses::new().await;
    overwrite_total(&fx.ledger, fx.variant, -3).await;

    let record = fx
        .ledger
        .state
        .inventory
        .adjust(AdjustRequest::new(fx.variant, fx.warehouse_b, 1, MovementType::Adjustment))
        .await
        .unwrap();

    assert_eq!(record.variant_total, 151);
    assert_eq!(fx.ledger.variant_total(fx.variant).await, 151);
}

#[tokio::test]
async fn resync_all_reports_only_drifted_variants() {
    let fx = TwoWarehouses::new().await;
    let other = fx.ledger.seed_variant("HAT-GRN").await;
    fx.ledger.receive(other, fx.warehouse_b, 8).await;
    overwrite_total(&fx.ledger, other, 0).await;

    let drifted = fx.ledger.state.inventory.resync_all().await.unwrap();

    assert_eq!(drifted.len(), 1);
    assert_eq!(drifted[0].variant_id, other);
    assert_eq!(drifted[0].previous_total, 0);
    assert_eq!(drifted[0].current_total, 8);
    assert_eq!(fx.ledger.variant_total(other).await, 8);
    assert_eq!(fx.ledger.variant_total(fx.variant).await, 150);
}

#[tokio::test]
async fn resync_of_variant_without_stock_is_zero() {
    let ledger = TestLedger::new().await;
    let variant = ledger.seed_variant("EMPTY-1").await;
    overwrite_total(&ledger, variant, 12).await;

    assert_eq!(ledger.state.inventory.resync(variant).await.unwrap(), 0);
    assert_eq!(ledger.variant_total(variant).await, 0);
}

#[tokio::test]
async fn tampered_projection_disagrees_with_ledger() {
    let fx = TwoWarehouses::new().await;
    location_inventory::Entity::update_many()
        .col_expr(location_inventory::Column::Quantity, Expr::value(7i64))
        .filter(location_inventory::Column::VariantId.eq(fx.variant))
        .filter(location_inventory::Column::LocationId.eq(fx.warehouse_a))
        .exec(&*fx.ledger.state.db)
        .await
        .unwrap();

    let report = fx
        .ledger
        .state
        .reconciliation_service()
        .reconcile(fx.variant)
        .await
        .unwrap();

    let at_a = report
        .locations
        .iter()
        .find(|l| l.location_id == fx.warehouse_a)
        .unwrap();
    assert_eq!(at_a.projection_quantity, 7);
    assert_eq!(at_a.ledger_quantity, 100);
    assert!(!at_a.is_consistent());
    assert_eq!(report.derived_total, 57);

    // Resync trusts the projection, so the location mismatch survives it.
    fx.ledger.state.inventory.resync(fx.variant).await.unwrap();
    let after = fx
        .ledger
        .state
        .reconciliation_service()
        .reconcile(fx.variant)
        .await
        .unwrap();
    assert_eq!(after.cached_total, 57);
    assert!(!after.is_consistent());
}

#[tokio::test]
async fn out_of_band_movement_shows_as_chain_break() {
    let fx = TwoWarehouses::new().await;
    let stray = inventory_movement::ActiveModel {
        variant_id: Set(fx.variant),
        location_id: Set(fx.warehouse_b),
        movement_type: Set(MovementType::Adjustment),
        quantity: Set(5),
        quantity_before: Set(0),
        quantity_after: Set(5),
        order_id: Set(None),
        order_item_id: Set(None),
        return_id: Set(None),
        purchase_order_item_id: Set(None),
        reference: Set(Some("imported".to_string())),
        notes: Set(None),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&*fx.ledger.state.db)
    .await
    .unwrap();

    let report = fx
        .ledger
        .state
        .reconciliation_service()
        .reconcile(fx.variant)
        .await
        .unwrap();

    let at_b = report
        .locations
        .iter()
        .find(|l| l.location_id == fx.warehouse_b)
        .unwrap();
    assert_eq!(at_b.chain_breaks.len(), 1);
    assert_eq!(at_b.chain_breaks[0].movement_id, stray.id);
    assert_eq!(at_b.chain_breaks[0].expected_before, 50);
    assert_eq!(at_b.ledger_quantity, 55);
    assert_eq!(at_b.projection_quantity, 50);
    assert!(!report.is_consistent());
}

#[tokio::test]
async fn reconcile_all_covers_every_variant() {
    let fx = TwoWarehouses::new().await;
    let other = fx.ledger.seed_variant("HAT-GRN").await;
    fx.ledger.receive(other, fx.warehouse_a, 4).await;

    let reports = fx
        .ledger
        .state
        .reconciliation_service()
        .reconcile_all()
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].variant_id, fx.variant);
    assert!(reports.iter().all(|r| r.is_consistent()));
}
