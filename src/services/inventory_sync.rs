use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::{
    db,
    entities::product_variant::{self, Entity as ProductVariantEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    queries::inventory_queries,
};

/// Cached aggregate before and after a recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregateSync {
    pub variant_id: i64,
    pub previous_total: i64,
    pub current_total: i64,
}

impl AggregateSync {
    pub fn drifted(&self) -> bool {
        self.previous_total != self.current_total
    }
}

/// Recomputes `product_variants.total_quantity` from the projection rows on `conn`.
///
/// Locks the variant row first. Callers that also hold projection locks must call this
/// after taking them, so locks are always acquired projection-then-variant.
pub async fn sync_variant_total<C>(conn: &C, variant_id: i64) -> Result<AggregateSync, ServiceError>
where
    C: ConnectionTrait,
{
    let variant = ProductVariantEntity::find_by_id(variant_id)
        .lock_exclusive()
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", variant_id)))?;

    let total = inventory_queries::sum_variant_quantity(conn, variant_id).await?;

    ProductVariantEntity::update_many()
        .col_expr(product_variant::Column::TotalQuantity, Expr::value(total))
        .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product_variant::Column::Id.eq(variant_id))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(AggregateSync {
        variant_id,
        previous_total: variant.total_quantity,
        current_total: total,
    })
}

/// Repair path for the variant aggregate.
#[derive(Clone)]
pub struct InventorySyncService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
    lock_timeout: Duration,
}

impl InventorySyncService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Option<EventSender>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            db,
            event_sender,
            lock_timeout,
        }
    }

    /// Rewrites one variant's aggregate from the projection, whatever is cached now.
    #[instrument(skip(self))]
    pub async fn resync(&self, variant_id: i64) -> Result<AggregateSync, ServiceError> {
        let txn = db::begin_with_lock_timeout(&self.db, self.lock_timeout).await?;

        let sync = sync_variant_total(&txn, variant_id).await?;

        txn.commit().await.map_err(|e| {
            error!("Failed to commit aggregate resync: {}", e);
            ServiceError::db_error(e)
        })?;

        if sync.drifted() {
            warn!(
                variant_id,
                previous_total = sync.previous_total,
                current_total = sync.current_total,
                "Variant aggregate had drifted from location stock; repaired"
            );
            metrics::counter!("inventory_ledger.aggregate_drift_repaired", 1);
        } else {
            info!(variant_id, total = sync.current_total, "Variant aggregate in sync");
        }

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::VariantAggregateResynced {
                    variant_id,
                    previous_total: sync.previous_total,
                    current_total: sync.current_total,
                });
        }

        Ok(sync)
    }

    /// Resyncs every variant. Returns only the variants whose cached total was wrong.
    #[instrument(skip(self))]
    pub async fn resync_all(&self) -> Result<Vec<AggregateSync>, ServiceError> {
        let variant_ids = inventory_queries::all_variant_ids(&*self.db).await?;
        let mut drifted = Vec::new();

        for variant_id in variant_ids {
            let sync = self.resync(variant_id).await?;
            if sync.drifted() {
                drifted.push(sync);
            }
        }

        info!(repaired = drifted.len(), "Aggregate resync pass finished");
        Ok(drifted)
    }
}
