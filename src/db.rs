use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::gauge;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbBackend,
    Statement, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

impl DbConfig {
    pub fn is_sqlite(&self) -> bool {
        self.url.starts_with("sqlite:")
    }

    /// Pool size actually used, as `(min, max)`.
    ///
    /// SQLite allows one writer at a time and the ledger's row locks do not exist there,
    /// so every SQLite pool is held to a single connection.
    pub fn pool_bounds(&self) -> (u32, u32) {
        if self.is_sqlite() {
            (self.min_connections.min(1), 1)
        } else {
            (self.min_connections, self.max_connections)
        }
    }
}

/// Establishes a connection pool to the database with custom configuration
///
/// # Errors
/// Returns a `ServiceError` if the connection cannot be established
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("Configuring database connection with: {:?}", config);

    let (min_connections, max_connections) = config.pool_bounds();
    if max_connections < config.max_connections {
        warn!(
            requested = config.max_connections,
            "SQLite pool limited to a single connection"
        );
    }

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(max_connections)
        .min_connections(min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("inventory_ledger.db.max_connections", max_connections as f64);

    info!(
        "Connecting to database with max_connections={}",
        max_connections
    );

    let db_pool = Database::connect(opt).await.map_err(|e| {
        error!("Database connection establishment failed: {}", e);
        ServiceError::DatabaseError(e)
    })?;

    info!("Database connection pool established successfully");
    Ok(db_pool)
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Runs the embedded schema migrations
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    info!("Running database migrations");
    let start = std::time::Instant::now();

    let result = crate::migrator::Migrator::up(pool, None)
        .await
        .map_err(ServiceError::DatabaseError);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!("Database migrations completed successfully in {:?}", elapsed),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result
}

/// Opens a transaction that gives up waiting on row locks after `lock_timeout`.
///
/// Postgres gets a transaction-scoped `lock_timeout`. SQLite has no row locks; writers
/// queue on the single pooled connection and the acquire timeout bounds the wait instead.
pub async fn begin_with_lock_timeout(
    pool: &DbPool,
    lock_timeout: Duration,
) -> Result<DatabaseTransaction, ServiceError> {
    let txn = pool.begin().await.map_err(ServiceError::db_error)?;

    if txn.get_database_backend() == DbBackend::Postgres {
        let sql = format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout.as_millis());
        txn.execute(Statement::from_string(DbBackend::Postgres, sql))
            .await
            .map_err(ServiceError::db_error)?;
    }

    Ok(txn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str, min_connections: u32, max_connections: u32) -> DbConfig {
        DbConfig {
            url: url.to_string(),
            min_connections,
            max_connections,
            ..DbConfig::default()
        }
    }

    #[test]
    fn sqlite_pools_hold_one_connection() {
        assert_eq!(config("sqlite://ledger.db?mode=rwc", 4, 8).pool_bounds(), (1, 1));
        assert_eq!(config("sqlite::memory:", 0, 1).pool_bounds(), (0, 1));
    }

    #[test]
    fn postgres_pools_keep_configured_bounds() {
        assert_eq!(config("postgres://localhost/ledger", 2, 20).pool_bounds(), (2, 20));
    }
}
