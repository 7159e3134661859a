//! Producer-side API: enqueue jobs, compose chains and batches.

use crate::adapter::JobAdapter;
use crate::batch::Batch;
use crate::chain::Chain;
use crate::error::JobResult;
use crate::job::{DynJob, Job, JobContext, JobId};
use crate::metrics::JobMetrics;
use crate::middleware::{Handler, Pipeline};
use crate::registry::Registry;
use crate::serialized::{now_millis, DeadJob, QueueStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Object-safe enqueue capability, handed to event handlers and the scheduler.
#[async_trait]
pub trait Enqueuer: Send + Sync {
    /// Enqueues a job; `None` means eligible immediately.
    async fn enqueue(&self, job: Box<dyn DynJob>, run_at: Option<DateTime<Utc>>) -> JobResult<JobId>;
}

/// Runs jobs in-process through the middleware pipeline.
///
/// Used by chains and batches, which execute their members directly instead
/// of round-tripping through the adapter.
#[derive(Clone)]
pub(crate) struct InlineRunner {
    handler: Handler,
    registry: Arc<Registry>,
}

impl InlineRunner {
    pub(crate) fn new(handler: Handler, registry: Arc<Registry>) -> Self {
        Self { handler, registry }
    }

    pub(crate) async fn run(
        &self,
        job: Arc<dyn DynJob>,
        origin: &str,
        cancel: CancellationToken,
    ) -> JobResult<()> {
        let ctx = JobContext::inline(
            job.as_ref(),
            origin,
            self.registry.max_retries_for(job.as_ref()),
            self.registry.timeout_for(job.as_ref()),
            cancel,
            self.registry.services().clone(),
        );
        (self.handler)(ctx, job).await
    }
}

/// Job dispatcher. Cheap to clone and safe to share between producers.
#[derive(Clone)]
pub struct Dispatcher {
    adapter: Arc<dyn JobAdapter>,
    registry: Arc<Registry>,
    runner: InlineRunner,
}

impl Dispatcher {
    /// Creates a dispatcher; chains and batches run through `pipeline`.
    pub fn new(adapter: Arc<dyn JobAdapter>, registry: Arc<Registry>, pipeline: &Pipeline) -> Self {
        let runner = InlineRunner::new(pipeline.handler(), registry.clone());
        Self {
            adapter,
            registry,
            runner,
        }
    }

    /// Enqueues a job for immediate execution.
    pub async fn perform<J: Job>(&self, job: J) -> JobResult<JobId> {
        self.dispatch(&job, None).await
    }

    /// Enqueues a job that becomes eligible at `at`.
    pub async fn perform_at<J: Job>(&self, job: J, at: DateTime<Utc>) -> JobResult<JobId> {
        self.dispatch(&job, Some(at)).await
    }

    /// Enqueues a job that becomes eligible after `delay`.
    pub async fn perform_in<J: Job>(&self, job: J, delay: Duration) -> JobResult<JobId> {
        self.dispatch(&job, Some(after(delay))).await
    }

    async fn dispatch(&self, job: &dyn DynJob, run_at: Option<DateTime<Utc>>) -> JobResult<JobId> {
        let record = self.registry.serialize(job, run_at)?;
        let queue = record.queue.clone();
        let job_type = record.job_type.clone();
        let at = record.run_at;

        let id = self.adapter.enqueue_at(record, at).await?;

        JobMetrics::job_enqueued(&queue, &job_type);
        debug!(job_id = %id, job_type = %job_type, queue = %queue, run_at = %at, "Job dispatched");
        Ok(id)
    }

    /// Sequential composition; see [`Chain`].
    pub fn chain(&self, jobs: impl IntoIterator<Item = Box<dyn DynJob>>) -> Chain {
        Chain::new(self.runner.clone(), jobs)
    }

    /// Concurrent composition; see [`Batch`].
    pub fn batch(&self, jobs: impl IntoIterator<Item = Box<dyn DynJob>>) -> Batch {
        Batch::new(self.runner.clone(), jobs)
    }

    /// Per-queue counters.
    pub async fn stats(&self) -> JobResult<HashMap<String, QueueStats>> {
        self.adapter.stats().await
    }

    /// Removes queued jobs from one queue, or all queues.
    pub async fn clear(&self, queue: Option<&str>) -> JobResult<u64> {
        self.adapter.clear(queue).await
    }

    /// Most recent dead jobs.
    pub async fn dead_jobs(&self, queue: Option<&str>, limit: usize) -> JobResult<Vec<DeadJob>> {
        self.adapter.dead_jobs(queue, limit).await
    }

    /// Backend health check.
    pub async fn health(&self) -> JobResult<()> {
        self.adapter.ping().await
    }

    /// Closes the adapter.
    pub async fn close(&self) -> JobResult<()> {
        self.adapter.close().await
    }

    /// Registry used for serialization.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Underlying adapter.
    pub fn adapter(&self) -> &Arc<dyn JobAdapter> {
        &self.adapter
    }
}

#[async_trait]
impl Enqueuer for Dispatcher {
    async fn enqueue(&self, job: Box<dyn DynJob>, run_at: Option<DateTime<Utc>>) -> JobResult<JobId> {
        self.dispatch(job.as_ref(), run_at).await
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("adapter", &self.adapter.name())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn after(delay: Duration) -> DateTime<Utc> {
    let now = now_millis();
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::config::WorkerConfig;
    use crate::error::JobError;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct ExpireQuote {
        quote_id: String,
    }

    #[async_trait]
    impl Job for ExpireQuote {
        const NAME: &'static str = "expire_quote";
        const QUEUE: &'static str = "low";
        const PRIORITY: i32 = 3;

        async fn perform(&self, _ctx: &JobContext) -> JobResult<()> {
            Ok(())
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Unregistered;

    #[async_trait]
    impl Job for Unregistered {
        const NAME: &'static str = "unregistered";

        async fn perform(&self, _ctx: &JobContext) -> JobResult<()> {
            Ok(())
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<MemoryAdapter>) {
        let mut builder = Registry::builder();
        builder.register::<ExpireQuote>().unwrap();
        let adapter = Arc::new(MemoryAdapter::new());
        let dispatcher = Dispatcher::new(
            adapter.clone(),
            builder.build(),
            &Pipeline::standard(&WorkerConfig::default()),
        );
        (dispatcher, adapter)
    }

    fn quote(id: &str) -> ExpireQuote {
        ExpireQuote { quote_id: id.into() }
    }

    #[tokio::test]
    async fn test_perform_enqueues_on_job_queue() {
        let (dispatcher, adapter) = dispatcher();
        let id = dispatcher.perform(quote("q-1")).await.unwrap();

        let job = adapter.dequeue("low", "w").await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.job_type, "expire_quote");
        assert_eq!(job.priority, 3);
        assert_eq!(job.max_retries, 3);
        assert_eq!(job.payload, serde_json::json!({ "quote_id": "q-1" }));
    }

    #[tokio::test]
    async fn test_perform_in_schedules_later() {
        let (dispatcher, adapter) = dispatcher();
        dispatcher
            .perform_in(quote("q-2"), Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(adapter.dequeue("low", "w").await.unwrap().is_none());
        let stats = dispatcher.stats().await.unwrap();
        assert_eq!(stats["low"].scheduled, 1);
        assert_eq!(stats["low"].pending, 0);
    }

    #[tokio::test]
    async fn test_perform_at_keeps_timestamp() {
        let (dispatcher, adapter) = dispatcher();
        let at = now_millis() - chrono::Duration::seconds(5);
        dispatcher.perform_at(quote("q-3"), at).await.unwrap();

        let job = adapter.dequeue("low", "w").await.unwrap().unwrap();
        assert_eq!(job.run_at, at);
    }

    #[tokio::test]
    async fn test_unregistered_type_is_rejected() {
        let (dispatcher, _) = dispatcher();
        let err = dispatcher.perform(Unregistered).await.unwrap_err();
        assert!(matches!(err, JobError::UnknownType(name) if name == "unregistered"));
    }

    #[tokio::test]
    async fn test_enqueuer_capability() {
        let (dispatcher, adapter) = dispatcher();
        let enqueuer: Arc<dyn Enqueuer> = Arc::new(dispatcher);
        enqueuer.enqueue(Box::new(quote("q-4")), None).await.unwrap();

        assert!(adapter.dequeue("low", "w").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_and_health_delegate() {
        let (dispatcher, _) = dispatcher();
        dispatcher.perform(quote("a")).await.unwrap();
        dispatcher.perform(quote("b")).await.unwrap();

        assert_eq!(dispatcher.clear(Some("low")).await.unwrap(), 2);
        dispatcher.health().await.unwrap();
        assert!(dispatcher.dead_jobs(None, 10).await.unwrap().is_empty());
    }
}
