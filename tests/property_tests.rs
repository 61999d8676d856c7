//! Property-based tests for the movement ledger.
//!
//! Each case replays a random sequence of adjustments against a fresh database and
//! checks the ledger invariants after every call.

mod common;

use common::TestLedger;
use proptest::prelude::*;
use stateset_ledger::{
    entities::MovementType,
    events::lifecycle::OrderStatus,
    services::{inventory::AdjustRequest, location_resolver::OrderRef},
    ServiceError,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

// Zero is included on purpose; it must always be rejected.
fn step_strategy() -> impl Strategy<Value = (usize, i64)> {
    (0usize..3, prop_oneof![1 => Just(0i64), 8 => -60i64..60])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn random_adjustments_keep_ledger_invariants(steps in prop::collection::vec(step_strategy(), 1..25)) {
        runtime().block_on(async {
            let ledger = TestLedger::new().await;
            let locations = [
                ledger.seed_location("WH-A", true).await,
                ledger.seed_location("WH-B", false).await,
                ledger.seed_location("WH-C", false).await,
            ];
            let variant = ledger.seed_variant("PROP-1").await;
            let mut expected = [0i64; 3];

            for (index, delta) in steps {
                let location = locations[index];
                let written_before = ledger.movements(variant).await.len();
                let result = ledger
                    .state
                    .inventory
                    .adjust(AdjustRequest::new(variant, location, delta, MovementType::Adjustment))
                    .await;

                if delta == 0 {
                    prop_assert!(matches!(result, Err(ServiceError::InvalidDelta(_))));
                    prop_assert_eq!(ledger.movements(variant).await.len(), written_before);
                    continue;
                }

                let record = result.map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(record.quantity_before(), expected[index]);
                expected[index] += delta;
                prop_assert_eq!(record.quantity_after(), expected[index]);
                prop_assert_eq!(record.variant_total, expected.iter().sum::<i64>());
            }

            let movements = ledger.movements(variant).await;
            for (index, location) in locations.iter().enumerate() {
                let chain: Vec<_> = movements.iter().filter(|m| m.location_id == *location).collect();
                for pair in chain.windows(2) {
                    prop_assert_eq!(pair[1].quantity_before, pair[0].quantity_after);
                }
                let ledger_sum: i64 = chain.iter().map(|m| m.quantity).sum();
                prop_assert_eq!(ledger.quantity_at(variant, *location).await, ledger_sum);
                prop_assert_eq!(ledger_sum, expected[index]);
            }
            prop_assert_eq!(ledger.variant_total(variant).await, expected.iter().sum::<i64>());
            Ok(())
        })?;
    }

    #[test]
    fn replayed_lifecycle_events_write_once(quantity in 1i64..40, sale_replays in 1usize..4, cancel_replays in 1usize..4) {
        runtime().block_on(async {
            let ledger = TestLedger::new().await;
            let location = ledger.seed_location("WH-A", true).await;
            let variant = ledger.seed_variant("PROP-2").await;
            ledger.receive(variant, location, 50).await;
            let adapters = &ledger.state.adapters;

            for _ in 0..sale_replays {
                adapters
                    .on_order_item_created(&OrderRef::new(42), Some(1), variant, quantity)
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
            }
            prop_assert_eq!(ledger.variant_total(variant).await, 50 - quantity);

            for _ in 0..cancel_replays {
                adapters
                    .on_order_status_changed(42, OrderStatus::Cancelled)
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
            }

            prop_assert_eq!(ledger.movements_of_type(variant, MovementType::Sale).await.len(), 1);
            prop_assert_eq!(ledger.movements_of_type(variant, MovementType::Cancellation).await.len(), 1);
            prop_assert_eq!(ledger.variant_total(variant).await, 50);
            Ok(())
        })?;
    }
}
