pub mod inventory_queries;

pub use inventory_queries::{Correlation, MovementGuard, Query};
