use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_DATABASE_URL: &str = "sqlite://stateset_ledger.db?mode=rwc";
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_QUEUE_MAX_SIZE: usize = 10_000;
const DEFAULT_QUEUE_MAX_RETRIES: u32 = 5;
const DEFAULT_WORKER_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_WORKER_BACKOFF_BASE_MS: u64 = 100;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Wait budget for the (location, variant) row lock taken by every adjustment
    #[serde(default = "default_lock_timeout_ms")]
    #[validate(range(min = 1))]
    pub lock_timeout_ms: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Maximum number of pending messages per queue topic
    #[serde(default = "default_queue_max_size")]
    #[validate(range(min = 1))]
    pub queue_max_size: usize,

    /// Redeliveries before a lifecycle message is dead-lettered
    #[serde(default = "default_queue_max_retries")]
    pub queue_max_retries: u32,

    /// Idle sleep between queue polls
    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    /// Base delay for exponential backoff on retryable failures
    #[serde(default = "default_worker_backoff_base_ms")]
    pub worker_backoff_base_ms: u64,

    /// Integration id -> location code. Orders placed through an integration
    /// with an entry here always move stock at that location.
    #[serde(default)]
    pub integration_locations: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the database and environment.
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            lock_timeout_ms: default_lock_timeout_ms(),
            event_channel_capacity: default_event_channel_capacity(),
            queue_max_size: default_queue_max_size(),
            queue_max_retries: default_queue_max_retries(),
            worker_poll_interval_ms: default_worker_poll_interval_ms(),
            worker_backoff_base_ms: default_worker_backoff_base_ms(),
            integration_locations: HashMap::new(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }

    pub fn worker_backoff_base(&self) -> Duration {
        Duration::from_millis(self.worker_backoff_base_ms)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections cannot exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        // SQLite in-memory databases are per-connection; a second connection sees an empty schema.
        if self.database_url.contains(":memory:") && self.db_max_connections != 1 {
            let mut err = ValidationError::new("db_max_connections");
            err.message = Some("in-memory SQLite requires db_max_connections = 1".into());
            errors.add("db_max_connections", err);
        }

        if self.is_production() && self.database_url.starts_with("sqlite:") {
            let mut err = ValidationError::new("database_url");
            err.message = Some("production requires a Postgres database_url".into());
            errors.add("database_url", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}
fn default_event_channel_capacity() -> usize {
    1024
}
fn default_queue_max_size() -> usize {
    DEFAULT_QUEUE_MAX_SIZE
}
fn default_queue_max_retries() -> u32 {
    DEFAULT_QUEUE_MAX_RETRIES
}
fn default_worker_poll_interval_ms() -> u64 {
    DEFAULT_WORKER_POLL_INTERVAL_MS
}
fn default_worker_backoff_base_ms() -> u64 {
    DEFAULT_WORKER_BACKOFF_BASE_MS
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if (1..=1_000_000).contains(&capacity) {
        Ok(())
    } else {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("Must be between 1 and 1000000".into());
        Err(err)
    }
}

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("stateset_ledger={level},inventory_audit={level},sea_orm=warn");
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads configuration in layers:
/// 1. Built-in defaults
/// 2. `config/default` file (optional)
/// 3. Environment-specific config (`config/{env}`, optional)
/// 4. Environment variables (`APP__*`)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", DEFAULT_DATABASE_URL)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
