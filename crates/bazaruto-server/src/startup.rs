//! Worker startup utilities.

use bazaruto_config::AppConfig;
use bazaruto_jobs::AdapterConfig;
use tracing::info;

/// Prints the startup banner.
pub fn print_banner() {
    info!(r#"
    ____                                  __
   / __ )____ _____  ____ ________  __/ /_____
  / __  / __ `/_  / / __ `/ ___/ / / / __/ __ \
 / /_/ / /_/ / / /_/ /_/ / /  / /_/ / /_/ /_/ /
/_____/\__,_/ /___/\__,_/_/   \__,_/\__/\____/

                       Job Worker
    "#);
}

/// Short label of the configured backend, without credentials.
pub fn adapter_summary(adapter: &AdapterConfig) -> String {
    match adapter {
        AdapterConfig::Memory => "memory".to_string(),
        AdapterConfig::Redis(redis) => format!("redis (prefix {})", redis.key_prefix),
        AdapterConfig::Sql(sql) => format!("postgres (max {} connections)", sql.max_connections),
    }
}

/// Prints worker startup information.
pub fn print_startup_info(config: &AppConfig) {
    let separator = "=".repeat(60);
    let worker = &config.jobs.worker;
    info!("{}", separator);
    info!("Environment: {}", config.app.environment);
    info!("Backend:     {}", adapter_summary(&config.jobs.adapter));
    info!("Queues:      {}", worker.queues.join(", "));
    info!("Concurrency: {}", worker.concurrency);
    info!("Scheduler:   {}", if config.jobs.scheduler.enabled { "enabled" } else { "disabled" });
    if config.observability.metrics_enabled {
        info!("Metrics:     http://{}/metrics", config.observability.metrics_addr);
    }
    info!("{}", separator);
}
