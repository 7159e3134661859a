//! Application configuration structures.

use bazaruto_jobs::JobsConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration of the worker process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Job engine configuration.
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Event bus configuration.
    #[serde(default)]
    pub events: EventsConfig,

    /// Outbound webhook delivery.
    #[serde(default)]
    pub webhooks: WebhookConfig,

    /// Generated policy documents.
    #[serde(default)]
    pub documents: DocumentsConfig,

    /// Logging, tracing and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
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
            name: "bazaruto-worker".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Time granted to running handlers on shutdown, in seconds.
    #[serde(default = "default_events_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: default_events_grace(),
        }
    }
}

impl EventsConfig {
    /// Shutdown grace as a Duration.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_events_grace() -> u64 {
    10
}

/// Outbound webhook delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// HTTP request timeout in seconds.
    #[serde(default = "default_webhook_timeout")]
    pub request_timeout_secs: u64,

    /// User-Agent header sent to partners.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Shared secret sent in the `X-Bazaruto-Webhook-Secret` header, when configured.
    #[serde(default)]
    pub signing_secret: Option<String>,

    /// Partner endpoints and the event topics they receive.
    #[serde(default)]
    pub endpoints: Vec<WebhookEndpoint>,
}

/// A partner endpoint subscribed to marketplace topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub url: String,
    pub topics: Vec<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_webhook_timeout(),
            user_agent: default_user_agent(),
            signing_secret: None,
            endpoints: Vec::new(),
        }
    }
}

impl WebhookConfig {
    /// Request timeout as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Endpoints subscribed to `topic`.
    pub fn endpoints_for<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = &'a WebhookEndpoint> + 'a {
        self.endpoints
            .iter()
            .filter(move |endpoint| endpoint.topics.iter().any(|t| t == topic))
    }
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("bazaruto-webhooks/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Storage of generated policy documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsConfig {
    /// Directory documents are written to.
    #[serde(default = "default_documents_dir")]
    pub dir: String,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            dir: default_documents_dir(),
        }
    }
}

fn default_documents_dir() -> String {
    "./data/documents".to_string()
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format (json, pretty).
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// OTLP collector endpoint; tracing export is disabled when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// Trace sampling ratio (0.0 to 1.0).
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,

    /// Enable the Prometheus exporter.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Listen address of the Prometheus exporter.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            otlp_endpoint: None,
            sampling_ratio: default_sampling_ratio(),
            metrics_enabled: true,
            metrics_addr: default_metrics_addr(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9464".to_string()
}
