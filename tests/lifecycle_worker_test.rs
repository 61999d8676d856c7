mod common;

use std::sync::Arc;
use std::time::Duration;

use common::TwoWarehouses;
use stateset_ledger::{
    entities::MovementType,
    events::{
        lifecycle::{LifecycleEvent, OrderStatus},
        worker::DrainStats,
    },
    message_queue::InMemoryMessageQueue,
};
use tokio::sync::watch;

fn order_item(variant_id: i64, order_id: i64, quantity: i64) -> LifecycleEvent {
    LifecycleEvent::OrderItemCreated {
        order_id,
        order_item_id: Some(order_id * 10),
        variant_id,
        quantity,
        integration_id: None,
    }
}

#[tokio::test]
async fn duplicate_deliveries_produce_one_movement() {
    let fx = TwoWarehouses::new().await;
    let queue = Arc::new(InMemoryMessageQueue::from_config(&fx.ledger.state.config));
    let worker = fx.ledger.state.lifecycle_worker(queue.clone());

    let sale = order_item(fx.variant, 42, 10);
    let cancel = LifecycleEvent::OrderStatusChanged {
        order_id: 42,
        new_status: OrderStatus::Cancelled,
    };
    for event in [&sale, &sale, &cancel, &cancel] {
        worker.publish(event).await.unwrap();
    }

    let stats = worker.drain_once().await.unwrap();

    assert_eq!(
        stats,
        DrainStats {
            acked: 4,
            retried: 0,
            dead_lettered: 0
        }
    );
    assert_eq!(fx.ledger.movements_of_type(fx.variant, MovementType::Sale).await.len(), 1);
    assert_eq!(
        fx.ledger
            .movements_of_type(fx.variant, MovementType::Cancellation)
            .await
            .len(),
        1
    );
    assert_eq!(fx.ledger.variant_total(fx.variant).await, 150);
    assert_eq!(queue.in_flight().await, 0);
}

#[tokio::test]
async fn events_for_unknown_variants_are_dead_lettered() {
    let fx = TwoWarehouses::new().await;
    let queue = Arc::new(InMemoryMessageQueue::from_config(&fx.ledger.state.config));
    let worker = fx.ledger.state.lifecycle_worker(queue.clone());

    worker.publish(&order_item(9_999, 7, 1)).await.unwrap();
    let stats = worker.drain_once().await.unwrap();

    assert_eq!(stats.dead_lettered, 1);
    let dead = queue.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert!(dead[0].reason.starts_with("Not found"));
    assert_eq!(fx.ledger.variant_total(fx.variant).await, 150);
}

#[tokio::test]
async fn running_worker_applies_events_until_shutdown() {
    let fx = TwoWarehouses::new().await;
    let queue = Arc::new(InMemoryMessageQueue::from_config(&fx.ledger.state.config));
    let worker = fx.ledger.state.lifecycle_worker(queue.clone());

    worker.publish(&order_item(fx.variant, 1, 3)).await.unwrap();
    worker.publish(&order_item(fx.variant, 2, 4)).await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.pending(stateset_ledger::events::lifecycle::LIFECYCLE_TOPIC).await > 0
            || queue.in_flight().await > 0
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker did not drain the queue");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .unwrap();

    assert_eq!(fx.ledger.movements_of_type(fx.variant, MovementType::Sale).await.len(), 2);
    assert_eq!(fx.ledger.variant_total(fx.variant).await, 143);
}
