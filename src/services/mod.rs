// Ledger core
pub mod inventory;
pub mod inventory_sync;
pub mod location_resolver;

// Callers of the ledger
pub mod inventory_adjustment_service;
pub mod lifecycle;
pub mod reconciliation;
