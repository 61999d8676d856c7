//! sea-orm entities backing the inventory ledger.
//!
//! `locations` and `product_variants` are owned by surrounding systems; the ledger
//! reads them and rewrites only `product_variants.total_quantity`.

pub mod inventory_location;
pub mod inventory_movement;
pub mod location_inventory;
pub mod product_variant;

pub use inventory_movement::MovementType;
