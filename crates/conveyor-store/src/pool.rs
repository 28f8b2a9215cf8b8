//! Postgres connection pool management.

use std::sync::Arc;
use std::time::Duration;

use conveyor_config::StoreConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

use crate::error::StoreResult;

/// Thin wrapper around a [`PgPool`] that knows how to connect, health
/// check, and migrate itself.
#[derive(Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Connects to Postgres using the given configuration.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        info!("connecting to Postgres");

        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .inspect_err(|e| warn!("failed to connect to Postgres: {e}"))?;

        info!("Postgres connection pool established");
        Ok(Self { pool })
    }

    /// Returns a reference to the underlying pool.
    #[must_use]
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    /// Checks that the database is reachable.
    pub async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Runs pending migrations embedded at compile time.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        info!("running database migrations");
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations completed");
        Ok(())
    }

    /// Closes the connection pool, waiting for in-flight queries to
    /// finish.
    pub async fn close(&self) {
        info!("closing Postgres connection pool");
        self.pool.close().await;
    }
}

impl std::fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabasePool")
            .field("size", &self.pool.size())
            .field("num_idle", &self.pool.num_idle())
            .finish()
    }
}

/// Creates a shared, ref-counted database pool.
pub async fn create_pool(config: &StoreConfig) -> StoreResult<Arc<DatabasePool>> {
    let pool = DatabasePool::connect(config).await?;
    Ok(Arc::new(pool))
}
