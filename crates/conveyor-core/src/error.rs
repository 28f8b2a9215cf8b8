//! Shared error type for all Conveyor crates.

use thiserror::Error;

/// Result alias used throughout Conveyor.
pub type ConveyorResult<T> = Result<T, ConveyorError>;

/// Unified error type spanning the durable store, coordination store,
/// and engine layers.
///
/// Each crate keeps its own narrower error type where it helps callers
/// match on specific failures (see `conveyor-store::StoreError` and
/// `conveyor-engine::EngineError`), both of which convert into this one
/// at the boundary where a caller only cares that something failed.
#[derive(Debug, Error)]
pub enum ConveyorError {
    /// The requested job does not exist in the durable store.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// A caller tried to move a job through a transition its current
    /// status does not allow (see the job status state diagram).
    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// An `idempotency_key` collided with an existing job.
    #[error("duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),

    /// Durable store (Postgres) error.
    #[error("store error: {0}")]
    Store(String),

    /// Coordination store (Redis) error.
    #[error("coordination error: {0}")]
    Coordination(String),

    /// JSON payload failed to serialize or deserialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Input failed validation rules.
    #[error("validation error: {0}")]
    Validation(String),

    /// Catch-all for errors that don't fit a more specific variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ConveyorError {
    /// Creates a configuration error from any displayable value.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a validation error from any displayable value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates an internal error from any displayable value.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for ConveyorError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::JobNotFound("unknown".to_string()),
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                Self::DuplicateIdempotencyKey(db_err.message().to_string())
            }
            _ => Self::Store(err.to_string()),
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for ConveyorError {
    fn from(err: redis::RedisError) -> Self {
        Self::Coordination(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_helper_wraps_message() {
        let err = ConveyorError::configuration("missing STORE_URL");
        assert!(err.to_string().contains("missing STORE_URL"));
    }

    #[test]
    fn invalid_transition_formats_both_states() {
        let err = ConveyorError::InvalidTransition {
            from: "COMPLETED".to_string(),
            to: "PENDING".to_string(),
        };
        assert_eq!(err.to_string(), "invalid job transition: COMPLETED -> PENDING");
    }
}
