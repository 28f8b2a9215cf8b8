//! Common test infrastructure for coordination-store integration tests.

use conveyor_engine::CoordinationStore;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::redis::Redis;

/// A Redis testcontainer plus a connected [`CoordinationStore`].
pub struct TestCoordination {
    _container: ContainerAsync<Redis>,
    store: CoordinationStore,
    url: String,
}

impl TestCoordination {
    pub async fn new() -> Self {
        let container = Redis::default().start().await.expect("failed to start Redis container");
        let port = container.get_host_port_ipv4(6379).await.expect("failed to get Redis port");

        let url = format!("redis://127.0.0.1:{port}");
        let cfg = deadpool_redis::Config::from_url(url.clone());
        let pool = cfg.builder().expect("invalid redis url").max_size(5).build().expect("failed to build redis pool");

        let store = CoordinationStore::new(pool, "conveyor-test");

        Self { _container: container, store, url }
    }

    #[must_use]
    pub fn store(&self) -> CoordinationStore {
        self.store.clone()
    }

    /// A second, independent `deadpool_redis::Pool` against the same
    /// container — needed by callers (e.g. the scheduler) that take a
    /// raw pool rather than a [`CoordinationStore`].
    #[must_use]
    pub fn raw_pool(&self) -> deadpool_redis::Pool {
        let cfg = deadpool_redis::Config::from_url(self.url.clone());
        cfg.builder().expect("invalid redis url").max_size(5).build().expect("failed to build redis pool")
    }
}
