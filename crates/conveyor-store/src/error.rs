//! Store-local error type.

use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the Postgres-backed durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("idempotency key already in use: {0}")]
    DuplicateIdempotencyKey(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<StoreError> for conveyor_core::ConveyorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::JobNotFound(id),
            StoreError::DuplicateIdempotencyKey(key) => Self::DuplicateIdempotencyKey(key),
            StoreError::Database(e) => Self::from(e),
            StoreError::Migration(e) => Self::Store(e.to_string()),
        }
    }
}
