//! Application configuration structures.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Durable store (Postgres) configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Coordination store (Redis) configuration.
    #[serde(default)]
    pub coordination: CoordinationConfig,

    /// Worker pool configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Retry and poison-pill detection configuration.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppMetadata::default(),
            store: StoreConfig::default(),
            coordination: CoordinationConfig::default(),
            worker: WorkerConfig::default(),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "conveyor".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Durable store (Postgres) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Postgres connection URL.
    pub url: String,
    /// Minimum connection pool size.
    pub min_connections: u32,
    /// Maximum connection pool size.
    pub max_connections: u32,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Idle timeout in seconds.
    pub idle_timeout_secs: u64,
    /// Run pending migrations on startup.
    pub run_migrations: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("DATABASE_URL").unwrap_or_default(),
            min_connections: 5,
            max_connections: 20,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
            run_migrations: true,
        }
    }
}

impl StoreConfig {
    /// Returns the connect timeout as a Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Returns the idle timeout as a Duration.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Coordination store (Redis) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Redis URL.
    pub url: String,
    /// Connection pool size.
    pub pool_size: usize,
    /// Key prefix, so multiple Conveyor deployments can share a Redis
    /// instance without colliding.
    pub key_prefix: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            key_prefix: "conveyor".to_string(),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of independent polling lanes to run.
    pub concurrency: usize,
    /// Queues this worker pool polls, in round-robin order.
    pub queues: Vec<String>,
    /// Interval between empty-queue polls.
    pub poll_interval_ms: u64,
    /// Grace period allowed for in-flight jobs to finish during a
    /// drain shutdown.
    pub drain_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queues: vec!["default".to_string()],
            poll_interval_ms: 250,
            drain_timeout_secs: 30,
        }
    }
}

impl WorkerConfig {
    /// Returns the poll interval as a Duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the drain timeout as a Duration.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between scheduler ticks (promote delayed jobs, reclaim
    /// timed-out jobs).
    pub tick_interval_ms: u64,
    /// TTL of the leader-election lock. Must exceed `tick_interval_ms`
    /// by a comfortable margin so a slow tick doesn't lose leadership
    /// mid-run.
    pub leader_lock_ttl_secs: u64,
    /// Number of ticks between orphaned-pending sweeps. The sweep runs
    /// on the leader's first tick and every `sweep_interval_ticks`
    /// ticks after that; it covers the crash gap between a delayed job
    /// leaving C1 and landing back in `waiting(Q)` (§5), which is rare
    /// enough not to need checking on every tick.
    pub sweep_interval_ticks: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            leader_lock_ttl_secs: 10,
            sweep_interval_ticks: 10,
        }
    }
}

impl SchedulerConfig {
    /// Returns the tick interval as a Duration.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Retry, backoff, and poison-pill detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base delay in milliseconds for exponential backoff
    /// (`base * 2^attempt + jitter`).
    pub backoff_base_ms: u64,
    /// Cap applied to the computed backoff delay.
    pub backoff_max_ms: u64,
    /// Sliding window (milliseconds) over which poison-pill failures
    /// are counted.
    pub poison_window_ms: u64,
    /// Number of failures within the window that marks a job a poison
    /// pill and short-circuits it straight to the dead-letter queue.
    pub poison_threshold: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1000,
            backoff_max_ms: 300_000,
            poison_window_ms: 60_000,
            poison_threshold: 3,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log format (json, pretty).
    pub log_format: String,
    /// Enable the Prometheus metrics exporter.
    pub metrics_enabled: bool,
    /// Address the Prometheus exporter listens on.
    pub metrics_addr: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_addr: "0.0.0.0:9464".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.app.name, "conveyor");
        assert_eq!(config.app.environment, "development");
        assert_eq!(config.worker.concurrency, 4);
    }

    #[test]
    fn test_app_config_serialization_roundtrip() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.app.name, parsed.app.name);
        assert_eq!(config.store.url, parsed.store.url);
    }

    #[test]
    fn test_app_metadata_default() {
        let meta = AppMetadata::default();
        assert_eq!(meta.name, "conveyor");
        assert!(!meta.version.is_empty());
    }

    #[test]
    fn test_store_config_timeouts() {
        let config = StoreConfig {
            connect_timeout_secs: 45,
            idle_timeout_secs: 300,
            ..StoreConfig::default()
        };
        assert_eq!(config.connect_timeout().as_secs(), 45);
        assert_eq!(config.idle_timeout().as_secs(), 300);
    }

    #[test]
    fn test_coordination_config_default() {
        let config = CoordinationConfig::default();
        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.key_prefix, "conveyor");
    }

    #[test]
    fn test_worker_config_durations() {
        let config = WorkerConfig {
            poll_interval_ms: 500,
            drain_timeout_secs: 45,
            ..WorkerConfig::default()
        };
        assert_eq!(config.poll_interval().as_millis(), 500);
        assert_eq!(config.drain_timeout().as_secs(), 45);
    }

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.tick_interval().as_millis(), 1000);
        assert!(config.leader_lock_ttl_secs > config.tick_interval_ms / 1000);
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.poison_threshold, 3);
        assert_eq!(config.poison_window_ms, 60_000);
    }

    #[test]
    fn test_observability_config_default() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.log_level, "info");
        assert!(config.metrics_enabled);
    }
}
