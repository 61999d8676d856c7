#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use stateset_ledger::{
    config::AppConfig,
    db,
    entities::{
        inventory_location, inventory_movement, location_inventory, product_variant, MovementType,
    },
    events::{self, Event, EventHandler, EventSender},
    services::inventory::{AdjustRequest, MovementRecord},
    LedgerState,
};
use tokio::sync::Mutex;

/// Integration id mapped to the `WH-B` location in every harness.
pub const MAPPED_INTEGRATION: &str = "marketplace-eu";

struct EventRecorder(Arc<Mutex<Vec<Event>>>);

#[async_trait]
impl EventHandler for EventRecorder {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        self.0.lock().await.push(event.clone());
        Ok(())
    }
}

/// Ledger wired against a fresh in-memory SQLite database.
pub struct TestLedger {
    pub state: LedgerState,
    events: Arc<Mutex<Vec<Event>>>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestLedger {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        // One connection: in-memory SQLite is per-connection, and concurrent writers
        // then queue on the pool the way they queue on row locks in Postgres.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        Self::with_config(cfg).await
    }

    /// Ledger over a SQLite file, asking for more connections than SQLite can write with.
    pub async fn on_file(path: &std::path::Path, max_connections: u32) -> Self {
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let mut cfg = AppConfig::new(url, "test".to_string());
        cfg.db_max_connections = max_connections;
        cfg.db_min_connections = 1;
        Self::with_config(cfg).await
    }

    pub async fn with_config(mut cfg: AppConfig) -> Self {
        cfg.db_acquire_timeout_secs = 30;
        cfg.worker_backoff_base_ms = 1;
        cfg.integration_locations = HashMap::from([(
            MAPPED_INTEGRATION.to_string(),
            "WH-B".to_string(),
        )]);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let (sender, rx) = EventSender::channel(cfg.event_channel_capacity);
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let event_task = tokio::spawn(events::process_events(
            rx,
            vec![Box::new(EventRecorder(recorded.clone()))],
        ));

        Self {
            state: LedgerState::new(Arc::new(pool), cfg, Some(sender)),
            events: recorded,
            _event_task: event_task,
        }
    }

    pub async fn seed_location(&self, code: &str, is_default: bool) -> i64 {
        let now = Utc::now();
        inventory_location::ActiveModel {
            name: Set(format!("Warehouse {}", code)),
            code: Set(code.to_string()),
            is_active: Set(true),
            is_default: Set(is_default),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("insert location")
        .id
    }

    pub async fn deactivate_location(&self, location_id: i64) {
        let location = inventory_location::Entity::find_by_id(location_id)
            .one(&*self.state.db)
            .await
            .unwrap()
            .unwrap();
        let mut active: inventory_location::ActiveModel = location.into();
        active.is_active = Set(false);
        active.update(&*self.state.db).await.unwrap();
    }

    pub async fn seed_variant(&self, sku: &str) -> i64 {
        let now = Utc::now();
        product_variant::ActiveModel {
            sku: Set(sku.to_string()),
            name: Set(format!("Variant {}", sku)),
            total_quantity: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("insert variant")
        .id
    }

    /// Puts opening stock on the books through the ledger.
    pub async fn receive(&self, variant_id: i64, location_id: i64, quantity: i64) -> MovementRecord {
        self.state
            .inventory
            .adjust(
                AdjustRequest::new(variant_id, location_id, quantity, MovementType::Adjustment)
                    .with_reference("Opening stock"),
            )
            .await
            .expect("opening stock")
    }

    pub async fn quantity_at(&self, variant_id: i64, location_id: i64) -> i64 {
        location_inventory::Entity::find()
            .filter(location_inventory::Column::VariantId.eq(variant_id))
            .filter(location_inventory::Column::LocationId.eq(location_id))
            .one(&*self.state.db)
            .await
            .unwrap()
            .map_or(0, |row| row.quantity)
    }

    pub async fn variant_total(&self, variant_id: i64) -> i64 {
        self.state.inventory.variant_total(variant_id).await.unwrap()
    }

    /// All movements for a variant in write order.
    pub async fn movements(&self, variant_id: i64) -> Vec<inventory_movement::Model> {
        inventory_movement::Entity::find()
            .filter(inventory_movement::Column::VariantId.eq(variant_id))
            .order_by_asc(inventory_movement::Column::Id)
            .all(&*self.state.db)
            .await
            .unwrap()
    }

    pub async fn movements_of_type(
        &self,
        variant_id: i64,
        movement_type: MovementType,
    ) -> Vec<inventory_movement::Model> {
        self.movements(variant_id)
            .await
            .into_iter()
            .filter(|m| m.movement_type == movement_type)
            .collect()
    }

    /// Events delivered so far. Sleeps first so the processing task can catch up.
    pub async fn recorded_events(&self) -> Vec<Event> {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        self.events.lock().await.clone()
    }
}

/// Two warehouses with 100 units at A (the default) and 50 at B.
pub struct TwoWarehouses {
    pub ledger: TestLedger,
    pub variant: i64,
    pub warehouse_a: i64,
    pub warehouse_b: i64,
}

impl TwoWarehouses {
    pub async fn new() -> Self {
        let ledger = TestLedger::new().await;
        let warehouse_a = ledger.seed_location("WH-A", true).await;
        let warehouse_b = ledger.seed_location("WH-B", false).await;
        let variant = ledger.seed_variant("TEE-BLK-M").await;
        ledger.receive(variant, warehouse_a, 100).await;
        ledger.receive(variant, warehouse_b, 50).await;

        Self {
            ledger,
            variant,
            warehouse_a,
            warehouse_b,
        }
    }
}
