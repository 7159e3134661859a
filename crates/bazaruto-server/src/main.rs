//! # Bazaruto Worker
//!
//! Runs the background job engine of the marketplace: workers, the lease
//! reaper, the cron scheduler and the event-to-job bridge.

use anyhow::Context;
use bazaruto_config::ConfigLoader;
use bazaruto_server::{startup, telemetry, AppBuilder};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Configuration errors happen before the subscriber exists.
        eprintln!("Application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config_loader = ConfigLoader::from_default_location().context("loading configuration")?;
    let config = config_loader.get().await;

    telemetry::init_telemetry(&config).context("initializing telemetry")?;
    startup::print_banner();
    info!("Starting Bazaruto worker...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    telemetry::init_metrics(&config.observability).context("installing metrics exporter")?;

    let app = AppBuilder::new()
        .with_config(config)
        .build()
        .await
        .context("building application")?;
    startup::print_startup_info(app.config());

    let shutdown = CancellationToken::new();
    app.start(&shutdown).context("starting job engine")?;

    shutdown_signal().await?;
    shutdown.cancel();

    let result = app.shutdown().await.context("stopping worker");
    telemetry::shutdown_telemetry();
    result
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("installing Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("installing SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<anyhow::Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        result = terminate => {
            result?;
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
    Ok(())
}
