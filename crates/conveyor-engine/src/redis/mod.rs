//! Coordination store connection and key layout.

use conveyor_config::CoordinationConfig;
use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;

use crate::error::{EngineError, EngineResult};

/// Creates a deadpool-backed Redis connection pool for the coordination
/// store, verifying connectivity with a `PING` before returning it.
pub async fn create_pool(config: &CoordinationConfig) -> EngineResult<Pool> {
    info!("creating coordination store connection pool");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| EngineError::Configuration(format!("invalid coordination store URL: {e}")))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| EngineError::Configuration(format!("failed to build coordination store pool: {e}")))?;

    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("coordination store connection pool ready");
    Ok(pool)
}

/// Builds the coordination store's normative key families: `waiting(Q)`,
/// `processing(Q)`, `delayed(Q)`, `dlq(Q)`, and `poison(job_id)`. Every
/// key holds only job ids (or a failure counter) — never a job's
/// payload, which always lives in the durable store.
pub struct CoordinationKeys {
    prefix: String,
}

impl CoordinationKeys {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// `waiting(Q)`: sorted set of ready-to-dispatch job ids, scored by
    /// `Priority::weight() + enqueue_timestamp_ms`.
    #[must_use]
    pub fn waiting(&self, queue: &str) -> String {
        format!("{}:waiting:{}", self.prefix, queue)
    }

    /// `processing(Q)`: set of job ids currently claimed by a worker.
    #[must_use]
    pub fn processing(&self, queue: &str) -> String {
        format!("{}:processing:{}", self.prefix, queue)
    }

    /// `delayed(Q)`: sorted set of job ids awaiting a future promotion
    /// instant (either a future `scheduled_at` or a retry backoff).
    #[must_use]
    pub fn delayed(&self, queue: &str) -> String {
        format!("{}:delayed:{}", self.prefix, queue)
    }

    /// `dlq(Q)`: list of dead-lettered job ids, newest last.
    #[must_use]
    pub fn dlq(&self, queue: &str) -> String {
        format!("{}:dlq:{}", self.prefix, queue)
    }

    /// `poison(job_id)`: sliding-window failure counter used by
    /// poison-pill detection. TTL'd to `poison_window_ms`.
    #[must_use]
    pub fn poison(&self, job_id: &str) -> String {
        format!("{}:poison:{}", self.prefix, job_id)
    }

    /// Scheduler leader-election lock.
    #[must_use]
    pub fn scheduler_lock(&self) -> String {
        format!("{}:scheduler:lock", self.prefix)
    }
}

impl Default for CoordinationKeys {
    fn default() -> Self {
        Self::new("conveyor")
    }
}
