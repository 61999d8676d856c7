//! StateSet Inventory Ledger
//!
//! Append-only stock movement ledger with a per-location projection and a cached
//! per-variant total. Every stock change goes through
//! [`services::inventory::InventoryService::adjust`], which locks the
//! (location, variant) row, writes the movement with before/after snapshots and
//! recomputes the variant total in one transaction. Order, return and purchase
//! events reach it through the idempotent adapters in [`services::lifecycle`].
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod message_queue;
pub mod migrator;
pub mod queries;
pub mod services;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    config::AppConfig,
    events::{worker::LifecycleWorker, EventSender},
    message_queue::MessageQueue,
    services::{
        inventory::InventoryService, inventory_adjustment_service::InventoryAdjustmentService,
        lifecycle::LifecycleAdapters, reconciliation::ReconciliationService,
    },
};

pub use crate::errors::ServiceError;

/// Services wired against one database pool.
#[derive(Clone)]
pub struct LedgerState {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub event_sender: Option<EventSender>,
    pub inventory: Arc<InventoryService>,
    pub adapters: Arc<LifecycleAdapters>,
}

impl LedgerState {
    pub fn new(db: Arc<DatabaseConnection>, config: AppConfig, event_sender: Option<EventSender>) -> Self {
        let inventory = Arc::new(InventoryService::from_config(
            db.clone(),
            event_sender.clone(),
            &config,
        ));
        let adapters = Arc::new(LifecycleAdapters::new(inventory.clone()));

        Self {
            db,
            config,
            event_sender,
            inventory,
            adapters,
        }
    }

    pub fn adjustment_service(&self) -> InventoryAdjustmentService {
        InventoryAdjustmentService::new(self.inventory.clone())
    }

    pub fn reconciliation_service(&self) -> ReconciliationService {
        ReconciliationService::new(self.db.clone())
    }

    pub fn lifecycle_worker(&self, queue: Arc<dyn MessageQueue>) -> LifecycleWorker {
        LifecycleWorker::from_config(queue, self.adapters.clone(), &self.config)
    }
}
