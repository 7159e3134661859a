//! Application builder.
//!
//! Wires the job manager, the event bus and the collaborators jobs need.
//! The bus is created first so jobs can publish through it; the bridge
//! handlers are subscribed once the dispatcher exists.

use crate::handlers;
use crate::jobs::{self, ExpireQuoteJob};
use crate::services::{
    DocumentStore, InMemoryQuoteStore, LocalDocumentStore, Notifier, QuoteStore, TracingNotifier,
};
use bazaruto_config::AppConfig;
use bazaruto_events::{EventBus, EventError, EventPublisher};
use bazaruto_jobs::{
    cron_expressions, Dispatcher, Enqueuer, JobAdapter, JobError, JobManager, ManagerStats,
    Registry,
};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Name of the periodic stale-quote sweep.
pub const EXPIRE_QUOTE_SWEEP: &str = "expire_quote_sweep";

/// Application wiring errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Jobs(#[from] JobError),

    #[error(transparent)]
    Events(#[from] EventError),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Application builder for constructing the worker.
#[derive(Default)]
pub struct AppBuilder {
    config: Option<AppConfig>,
    adapter: Option<Arc<dyn JobAdapter>>,
    notifier: Option<Arc<dyn Notifier>>,
    documents: Option<Arc<dyn DocumentStore>>,
    http: Option<reqwest::Client>,
}

impl AppBuilder {
    /// Creates a new application builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses an existing adapter instead of connecting the configured one.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn JobAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[must_use]
    pub fn with_document_store(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Builds the application without starting any background task.
    pub async fn build(self) -> Result<Application, AppError> {
        let config = self.config.unwrap_or_default();

        let http = match self.http {
            Some(client) => client,
            None => reqwest::Client::builder()
                .user_agent(config.webhooks.user_agent.as_str())
                .timeout(config.webhooks.request_timeout())
                .build()?,
        };
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(TracingNotifier) as Arc<dyn Notifier>);
        let documents = self.documents.unwrap_or_else(|| {
            Arc::new(LocalDocumentStore::new(&config.documents.dir)) as Arc<dyn DocumentStore>
        });

        let bus = EventBus::new();
        let quotes = InMemoryQuoteStore::new();

        let mut registry = Registry::builder();
        jobs::register_all(&mut registry)?;
        registry
            .service(http)
            .service(config.webhooks.clone())
            .service(notifier)
            .service(documents)
            .service(Arc::new(quotes.clone()) as Arc<dyn QuoteStore>)
            .service(Arc::new(bus.clone()) as Arc<dyn EventPublisher>);

        let manager = match self.adapter {
            Some(adapter) => JobManager::with_adapter(config.jobs.clone(), adapter, registry)?,
            None => JobManager::new(config.jobs.clone(), registry).await?,
        };

        let enqueuer: Arc<dyn Enqueuer> = Arc::new(manager.dispatcher().clone());
        handlers::subscribe_all(&bus, &enqueuer, &quotes)?;

        manager.scheduler().schedule(
            EXPIRE_QUOTE_SWEEP,
            cron_expressions::EVERY_15_MINUTES,
            ExpireQuoteJob::sweep,
        )?;

        Ok(Application {
            config,
            manager,
            bus,
            quotes,
        })
    }
}

/// A wired worker: job manager, event bus and bridge handlers.
pub struct Application {
    config: AppConfig,
    manager: JobManager,
    bus: EventBus,
    quotes: InMemoryQuoteStore,
}

impl Application {
    /// Starts workers, the lease reaper and the scheduler.
    pub fn start(&self, shutdown: &CancellationToken) -> Result<(), AppError> {
        self.manager.start(shutdown)?;
        info!(
            environment = %self.config.app.environment,
            adapter = self.manager.dispatcher().adapter().name(),
            "Worker started"
        );
        Ok(())
    }

    /// Drains the event bus, then stops the job engine and releases the backend.
    pub async fn shutdown(&self) -> Result<(), AppError> {
        self.bus.shutdown(self.config.events.shutdown_grace()).await;
        self.manager.close().await?;
        info!("Worker stopped");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Publishing side of the bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn manager(&self) -> &JobManager {
        &self.manager
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.manager.dispatcher()
    }

    pub fn quotes(&self) -> &InMemoryQuoteStore {
        &self.quotes
    }

    pub async fn stats(&self) -> Result<ManagerStats, AppError> {
        Ok(self.manager.stats().await?)
    }
}
