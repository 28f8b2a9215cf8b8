//! Server startup utilities.

use conveyor_config::AppConfig;
use tracing::info;

/// Prints the startup banner.
pub fn print_banner() {
    info!(r#"
    ___                                   ________                __
   /   |  ______________ _____  ____ _   / ____/ /___  __  ______/ /
  / /| | / ___/ ___/ __ `/ __ \/ __ `/  / /   / / __ \/ / / / __  /
 / ___ |/ /  / /__/ /_/ / / / / /_/ /  / /___/ / /_/ / /_/ / /_/ /
/_/  |_/_/   \___/\__,_/_/ /_/\__,_/   \____/_/\____/\__,_/\__,_/

                         Rust Edition
    "#);
}

/// Logs the resolved runtime configuration this process is about to run
/// with. There is no HTTP surface to report a bind address for — this
/// workspace only runs the worker pool and scheduler (see spec.md §1).
pub fn print_startup_info(config: &AppConfig) {
    let separator = "=".repeat(60);
    info!("{}", separator);
    info!("Environment:     {}", config.app.environment);
    info!("Queues:          {}", config.worker.queues.join(", "));
    info!("Worker concurrency: {}", config.worker.concurrency);
    info!("Scheduler tick:  {}ms", config.scheduler.tick_interval_ms);
    info!("Retry backoff:   base {}ms, cap {}ms", config.retry.backoff_base_ms, config.retry.backoff_max_ms);
    info!("Poison pill:     {} failures / {}ms window", config.retry.poison_threshold, config.retry.poison_window_ms);
    info!("Metrics:         {}", if config.observability.metrics_enabled { &config.observability.metrics_addr } else { "disabled" });
    info!("{}", separator);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_banner_does_not_panic() {
        let _ = tracing_subscriber::fmt::try_init();
        print_banner();
    }

    #[test]
    fn test_print_startup_info_does_not_panic() {
        let _ = tracing_subscriber::fmt::try_init();
        print_startup_info(&AppConfig::default());
    }
}
