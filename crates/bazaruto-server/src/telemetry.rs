//! Logging, tracing and metrics bootstrap for the worker process.
//!
//! Sets up:
//! - a `tracing` subscriber with an env filter and a pretty or JSON formatter
//! - an OpenTelemetry layer exporting spans over OTLP, when an endpoint is configured
//! - the Prometheus exporter serving the `metrics` facade

use bazaruto_config::{AppConfig, ObservabilityConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{RandomIdGenerator, Sampler},
    Resource,
};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use std::net::SocketAddr;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry setup failures.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to create OTLP exporter: {0}")]
    Exporter(String),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),

    #[error("Invalid metrics address: {0}")]
    Address(#[from] std::net::AddrParseError),

    #[error("Failed to install Prometheus exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Filter used when `RUST_LOG` is not set.
pub fn default_directives(log_level: &str) -> String {
    let level = log_level.to_lowercase();
    if level == "info" {
        "info,bazaruto=debug".to_string()
    } else {
        level
    }
}

fn sampler(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

/// Installs the global subscriber.
pub fn init_telemetry(config: &AppConfig) -> Result<(), TelemetryError> {
    let observability = &config.observability;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&observability.log_level)));

    let json = observability.log_format.eq_ignore_ascii_case("json");
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json().with_target(true));
    let pretty_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    let otel_layer = match &observability.otlp_endpoint {
        Some(endpoint) => {
            let tracer = build_tracer(config, observability, endpoint)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer)
        .with(otel_layer)
        .try_init()?;

    info!(
        service_name = %config.app.name,
        log_format = %observability.log_format,
        sampling_ratio = %observability.sampling_ratio,
        otlp_endpoint = ?observability.otlp_endpoint,
        "Telemetry initialized"
    );
    Ok(())
}

fn build_tracer(
    config: &AppConfig,
    observability: &ObservabilityConfig,
    endpoint: &str,
) -> Result<opentelemetry_sdk::trace::Tracer, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

    let resource = Resource::new(vec![
        KeyValue::new(SERVICE_NAME, config.app.name.clone()),
        KeyValue::new(SERVICE_VERSION, config.app.version.clone()),
        KeyValue::new("deployment.environment", config.app.environment.clone()),
    ]);

    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(sampler(observability.sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = provider.tracer("bazaruto-worker");
    opentelemetry::global::set_tracer_provider(provider);
    Ok(tracer)
}

/// Describes every metric and serves them on the configured address.
///
/// Must be called from within the Tokio runtime.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<(), TelemetryError> {
    if !config.metrics_enabled {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    let addr: SocketAddr = config.metrics_addr.parse()?;
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    bazaruto_jobs::register_metrics();
    bazaruto_events::register_metrics();

    info!(addr = %addr, "Prometheus exporter listening");
    Ok(())
}

/// Flushes pending spans.
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
    info!("Telemetry shutdown complete");
}
