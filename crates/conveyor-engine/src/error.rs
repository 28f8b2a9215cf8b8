//! Engine-local error type.

use thiserror::Error;

/// Result type used throughout `conveyor-engine`.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the coordination store, scheduler, worker pool, and
/// handler registry.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A registered handler returned an error while executing a job.
    #[error("handler failed: {0}")]
    HandlerFailed(String),

    /// No handler is registered for a job's `job_type`.
    #[error("no handler registered for job type: {0}")]
    UnregisteredJobType(String),

    /// A handler invocation exceeded its visibility timeout.
    #[error("job timed out after {0}s")]
    Timeout(u64),

    /// Job payload or result failed to serialize or deserialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Coordination store (Redis) error.
    #[error("coordination store error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Coordination store pool error.
    #[error("coordination store pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Durable store error, surfaced from `conveyor_core::ConveyorError`.
    #[error("durable store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error that doesn't fit a more specific variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether this failure should count toward a job's retry budget
    /// rather than something the lane itself should back off on.
    #[must_use]
    pub fn is_job_failure(&self) -> bool {
        matches!(self, Self::HandlerFailed(_) | Self::UnregisteredJobType(_) | Self::Timeout(_))
    }
}

impl From<conveyor_core::ConveyorError> for EngineError {
    fn from(err: conveyor_core::ConveyorError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<EngineError> for conveyor_core::ConveyorError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Store(msg) => Self::Store(msg),
            EngineError::Redis(e) => Self::Coordination(e.to_string()),
            EngineError::Pool(e) => Self::Coordination(e.to_string()),
            EngineError::Serialization(e) => Self::Serialization(e),
            EngineError::Configuration(msg) => Self::Configuration(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}
