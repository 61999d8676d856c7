use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use tracing::{debug, warn};

use crate::{
    config::AppConfig,
    entities::inventory_location::Model as LocationModel,
    errors::ServiceError,
    queries::inventory_queries,
};

/// Read-only lookup of the location an integration ships from.
#[async_trait]
pub trait IntegrationDirectory: Send + Sync {
    /// Location code configured for `integration_id`, if any.
    async fn location_code_for(&self, integration_id: &str) -> Option<String>;
}

/// Directory backed by the `integration_locations` config map.
#[derive(Debug, Clone, Default)]
pub struct StaticIntegrationDirectory {
    locations: HashMap<String, String>,
}

impl StaticIntegrationDirectory {
    pub fn new(locations: HashMap<String, String>) -> Self {
        Self { locations }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.integration_locations.clone())
    }
}

#[async_trait]
impl IntegrationDirectory for StaticIntegrationDirectory {
    async fn location_code_for(&self, integration_id: &str) -> Option<String> {
        self.locations.get(integration_id).cloned()
    }
}

/// The order a stock movement belongs to, as far as location selection cares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderRef {
    pub order_id: i64,
    pub integration_id: Option<String>,
}

impl OrderRef {
    pub fn new(order_id: i64) -> Self {
        Self {
            order_id,
            integration_id: None,
        }
    }

    pub fn via_integration(mut self, integration_id: impl Into<String>) -> Self {
        self.integration_id = Some(integration_id.into());
        self
    }
}

/// Picks the location a movement applies to when the caller does not name one.
#[derive(Clone)]
pub struct LocationResolver {
    db: Arc<DatabaseConnection>,
    integrations: Arc<dyn IntegrationDirectory>,
}

impl LocationResolver {
    pub fn new(db: Arc<DatabaseConnection>, integrations: Arc<dyn IntegrationDirectory>) -> Self {
        Self { db, integrations }
    }

    /// Integration mapping first, then the stock-based fallback.
    pub async fn resolve_for_order(
        &self,
        order: &OrderRef,
        variant_id: i64,
    ) -> Result<LocationModel, ServiceError> {
        if let Some(integration_id) = order.integration_id.as_deref() {
            if let Some(code) = self.integrations.location_code_for(integration_id).await {
                match inventory_queries::active_location_by_code(&*self.db, &code).await? {
                    Some(location) => {
                        debug!(
                            order_id = order.order_id,
                            integration_id,
                            location = %location.code,
                            "Using integration location"
                        );
                        return Ok(location);
                    }
                    None => warn!(
                        order_id = order.order_id,
                        integration_id,
                        code = %code,
                        "Integration maps to an unknown or inactive location; falling back"
                    ),
                }
            }
        }

        self.highest_stock_or_default(variant_id).await
    }

    /// Active location with the most stock of the variant (lowest id on ties), else the
    /// default location, else the lowest-id active location.
    pub async fn highest_stock_or_default(
        &self,
        variant_id: i64,
    ) -> Result<LocationModel, ServiceError> {
        if let Some(location) =
            inventory_queries::highest_stock_location(&*self.db, variant_id).await?
        {
            return Ok(location);
        }
        self.default_location().await
    }

    pub async fn default_location(&self) -> Result<LocationModel, ServiceError> {
        inventory_queries::fallback_location(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("No active locations configured".to_string()))
    }
}
