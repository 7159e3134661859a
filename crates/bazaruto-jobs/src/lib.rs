//! Bazaruto Jobs - Background Job Engine
//!
//! Durable background work for the Bazaruto insurance marketplace:
//! - Typed jobs serialized to JSON and resolved through a registry
//! - Pluggable adapters (in-memory, Redis, PostgreSQL)
//! - Per-job priorities, delays, retry budgets and timeouts
//! - Worker pools with a composable middleware pipeline
//! - Quadratic backoff with jitter and a dead-letter store
//! - Lease recovery for jobs held by crashed workers
//! - In-process chains and batches, cron scheduling
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Bazaruto Jobs                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  Dispatcher ── perform / perform_at / perform_in                 │
//! │     │        ── chain / batch (inline through the pipeline)      │
//! │     ▼                                                            │
//! │  ┌────────────────────────────────────────────────────────┐      │
//! │  │                 JobAdapter                             │      │
//! │  │   ┌────────┐      ┌────────┐      ┌──────────────┐     │      │
//! │  │   │ Memory │      │ Redis  │      │ PostgreSQL   │     │      │
//! │  │   └────────┘      └────────┘      └──────────────┘     │      │
//! │  └──────────────────────────┬─────────────────────────────┘      │
//! │                             │ dequeue (lease)                    │
//! │                             ▼                                    │
//! │  ┌────────────────────────────────────────────────────────┐      │
//! │  │ WorkerPool                                             │      │
//! │  │  recovery → logging → metrics → tracing → timeout      │      │
//! │  │           → retry → perform                            │      │
//! │  └──────────┬────────────────────┬────────────────────────┘      │
//! │             ▼                    ▼                               │
//! │        complete            retry / dead                          │
//! │                                                                  │
//! │  LeaseReaper ── expired leases back through retry / dead         │
//! │  Scheduler   ── cron schedules into the dispatcher               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use bazaruto_jobs::{Job, JobContext, JobManager, JobResult, JobsConfig, Registry};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct ExpireQuoteJob {
//!     quote_id: uuid::Uuid,
//! }
//!
//! #[async_trait::async_trait]
//! impl Job for ExpireQuoteJob {
//!     const NAME: &'static str = "expire_quote";
//!     const QUEUE: &'static str = "quotes";
//!
//!     async fn perform(&self, ctx: &JobContext) -> JobResult<()> {
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = Registry::builder();
//! registry.register::<ExpireQuoteJob>()?;
//!
//! let manager = JobManager::new(JobsConfig::default(), registry).await?;
//! manager.start(&shutdown)?;
//! manager
//!     .dispatcher()
//!     .perform_in(ExpireQuoteJob { quote_id }, Duration::from_secs(3600))
//!     .await?;
//! ```

pub mod adapter;
pub mod backoff;
pub mod batch;
pub mod chain;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod manager;
pub mod metrics;
pub mod middleware;
pub mod reaper;
pub mod registry;
pub mod scheduler;
pub mod serialized;
pub mod worker;

pub use adapter::{JobAdapter, MemoryAdapter, RedisAdapter, SqlAdapter};
pub use backoff::BackoffPolicy;
pub use batch::{Batch, BatchFailure, BatchHandle, BatchReport};
pub use chain::Chain;
pub use config::{
    AdapterConfig, BackoffConfig, JobsConfig, LeaseConfig, RedisConfig, SchedulerConfig,
    SqlConfig, WorkerConfig,
};
pub use dispatcher::{Dispatcher, Enqueuer};
pub use error::{JobError, JobResult};
pub use job::{DynJob, Job, JobContext, JobId, Services};
pub use manager::{JobManager, ManagerStats};
pub use metrics::{register_metrics, JobMetrics, SchedulerMetrics};
pub use middleware::{Handler, Middleware, Pipeline};
pub use reaper::LeaseReaper;
pub use registry::{JobDefaults, Registry, RegistryBuilder};
pub use scheduler::{cron_expressions, ScheduledJob, ScheduledJobInfo, Scheduler, SchedulerStats};
pub use serialized::{DeadJob, QueueStats, SerializedJob};
pub use worker::{WorkerPool, WorkerPoolStats};

/// Re-export commonly used traits
pub mod prelude {
    pub use crate::dispatcher::Enqueuer;
    pub use crate::job::{DynJob, Job};
    pub use crate::{JobContext, JobError, JobId, JobResult};
}
