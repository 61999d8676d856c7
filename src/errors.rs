use sea_orm::error::{DbErr, RuntimeErr};
use serde::Serialize;

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid quantity delta: {0}")]
    InvalidDelta(String),

    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    #[error("Missing correlation: {0}")]
    MissingCorrelation(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

/// Postgres `lock_not_available`, raised when `lock_timeout` expires.
const PG_LOCK_NOT_AVAILABLE: &str = "55P03";

/// True when the database error means we gave up waiting on a lock or a pooled connection.
fn is_lock_contention(err: &DbErr) -> bool {
    match err {
        DbErr::ConnectionAcquire(_) => true,
        DbErr::Exec(RuntimeErr::SqlxError(e)) | DbErr::Query(RuntimeErr::SqlxError(e)) => {
            if let Some(db_err) = e.as_database_error() {
                if db_err.code().as_deref() == Some(PG_LOCK_NOT_AVAILABLE) {
                    return true;
                }
            }
            let message = e.to_string().to_ascii_lowercase();
            message.contains("database is locked")
                || message.contains("database table is locked")
                || message.contains("lock timeout")
                || message.contains("could not obtain lock")
        }
        _ => false,
    }
}

impl ServiceError {
    /// Normalizes a database error, classifying lock contention as `LockTimeout`.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        let err = error.into_db_err();
        if is_lock_contention(&err) {
            metrics::counter!("inventory_ledger.lock_timeouts", 1);
            ServiceError::LockTimeout(err.to_string())
        } else {
            ServiceError::DatabaseError(err)
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout(_)
                | Self::DatabaseError(DbErr::Conn(_) | DbErr::ConnectionAcquire(_))
        )
    }

    /// Stable machine-readable code for logs and CLI output.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::InvalidDelta(_) => "invalid_delta",
            Self::LockTimeout(_) => "lock_timeout",
            Self::MissingCorrelation(_) => "missing_correlation",
            Self::ValidationError(_) => "validation_error",
            Self::QueueError(_) => "queue_error",
            Self::SerializationError(_) => "serialization_error",
            Self::InternalError(_) | Self::Other(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn connection_acquire_timeout_is_retryable_lock_timeout() {
        let err = ServiceError::db_error(DbErr::ConnectionAcquire(
            sea_orm::error::ConnAcquireErr::Timeout,
        ));
        assert_matches!(err, ServiceError::LockTimeout(_));
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), "lock_timeout");
    }

    #[test]
    fn plain_database_errors_are_not_reclassified() {
        let err = ServiceError::db_error("syntax error at or near SELECT");
        assert_matches!(err, ServiceError::DatabaseError(DbErr::Custom(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn business_errors_are_not_retryable() {
        assert!(!ServiceError::NotFound("variant 1".into()).is_retryable());
        assert!(!ServiceError::InvalidDelta("quantity cannot be zero".into()).is_retryable());
        assert!(!ServiceError::MissingCorrelation("order 42".into()).is_retryable());
    }

    #[test]
    fn display_includes_context() {
        assert_eq!(
            ServiceError::InvalidDelta("quantity cannot be zero".into()).to_string(),
            "Invalid quantity delta: quantity cannot be zero"
        );
    }
}
