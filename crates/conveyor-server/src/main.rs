//! # Conveyor Server
//!
//! Process entrypoint for Conveyor's monolithic deployment mode: a
//! single process that runs both the worker pool and the leader-elected
//! scheduler against a shared durable store and coordination store.

use std::sync::Arc;

use conveyor_config::{AppConfig, ConfigLoader};
use conveyor_core::ConveyorResult;
use conveyor_engine::{register_metrics, CoordinationStore, HandlerRegistry, Scheduler, WorkerPool};
use tokio::signal;
use tracing::{error, info};

mod startup;

#[tokio::main]
async fn main() {
    init_logging();

    info!("starting Conveyor server");
    info!(version = env!("CARGO_PKG_VERSION"), "build info");

    if let Err(e) = run().await {
        error!("application error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> ConveyorResult<()> {
    let config_loader = ConfigLoader::from_default_location()?;
    let config: AppConfig = config_loader.get().await;

    info!(environment = %config.app.environment, "loaded configuration");

    install_metrics_recorder(&config);

    let db_pool = conveyor_store::create_pool(&config.store).await?;
    if config.store.run_migrations {
        db_pool.run_migrations().await?;
    }
    let store: Arc<dyn conveyor_core::DurableStore> = Arc::new(conveyor_store::PostgresStore::new(db_pool));

    let redis_pool = conveyor_engine::create_pool(&config.coordination).await?;
    let coordination = CoordinationStore::new(redis_pool.clone(), config.coordination.key_prefix.clone());

    let handlers = build_handler_registry();

    let worker_pool = Arc::new(WorkerPool::new(
        store.clone(),
        coordination.clone(),
        handlers,
        config.worker.clone(),
        config.retry.clone(),
    ));

    let scheduler = Arc::new(Scheduler::new(
        redis_pool,
        store.clone(),
        coordination,
        config.scheduler.clone(),
        config.coordination.key_prefix.clone(),
        config.worker.queues.clone(),
    ));

    startup::print_banner();
    startup::print_startup_info(&config);

    let worker_handle = {
        let worker_pool = worker_pool.clone();
        tokio::spawn(async move { worker_pool.start().await })
    };
    let scheduler_handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.start().await })
    };

    shutdown_signal().await;
    info!("shutdown signal received, draining worker pool and scheduler");

    worker_pool.stop();
    scheduler.stop();

    if let Err(e) = worker_handle.await {
        error!("worker pool task panicked: {e}");
    }
    if let Err(e) = scheduler_handle.await {
        error!("scheduler task panicked: {e}");
    }

    info!("Conveyor server shutdown complete");
    Ok(())
}

/// Registers every job handler this deployment runs. Conveyor itself
/// defines the dispatch contract ([`conveyor_engine::JobHandler`]); the
/// handlers that actually do work are an operator concern and are
/// registered here before the worker pool starts.
fn build_handler_registry() -> HandlerRegistry {
    HandlerRegistry::new()
}

/// Installs the global Prometheus recorder without starting an HTTP
/// listener — the scrape endpoint that would serve
/// `config.observability.metrics_addr` is outside this workspace's
/// scope; the recorder and its registered series are what matters here.
fn install_metrics_recorder(config: &AppConfig) {
    if !config.observability.metrics_enabled {
        return;
    }

    match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
        Ok(_handle) => {
            register_metrics();
            info!(addr = %config.observability.metrics_addr, "Prometheus recorder installed");
        }
        Err(e) => error!("failed to install Prometheus recorder: {e}"),
    }
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,conveyor=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received terminate signal"),
    }
}
