use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Postgres SQLSTATE raised when `lock_timeout` expires while waiting on a lock.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Top-level error type for the ledger core
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for the outer (HTTP) layer.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
            AppError::Database(_)
            | AppError::Migration(_)
            | AppError::Config(_)
            | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Only lock contention is worth replaying the whole transaction for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::ConcurrencyConflict(_))
    }

    /// Translate a driver error raised while waiting on an advisory lock.
    pub fn from_lock_wait(error: sqlx::Error, key: i64) -> Self {
        match &error {
            sqlx::Error::Database(db) if db.code().as_deref() == Some(LOCK_NOT_AVAILABLE) => {
                AppError::ConcurrencyConflict(format!(
                    "Timed out waiting for edit lock {}",
                    key
                ))
            }
            _ => AppError::Database(error),
        }
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::Validation(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the ledger core
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::Validation("x".into()).error_code(), "VALIDATION_ERROR");
        assert_eq!(AppError::NotFound("x".into()).error_code(), "NOT_FOUND");
        assert_eq!(AppError::BadRequest("x".into()).error_code(), "BAD_REQUEST");
        assert_eq!(
            AppError::ConcurrencyConflict("x".into()).error_code(),
            "CONCURRENCY_CONFLICT"
        );
        assert_eq!(AppError::Internal("x".into()).error_code(), "INTERNAL_ERROR");
        assert_eq!(
            AppError::Database(sqlx::Error::RowNotFound).error_code(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(AppError::ConcurrencyConflict("busy".into()).is_retryable());
        assert!(!AppError::BadRequest("no".into()).is_retryable());
        assert!(!AppError::Database(sqlx::Error::PoolTimedOut).is_retryable());
    }

    #[test]
    fn test_non_lock_driver_errors_stay_database_errors() {
        let err = AppError::from_lock_wait(sqlx::Error::PoolTimedOut, 42);
        assert!(matches!(err, AppError::Database(_)));
    }
}
