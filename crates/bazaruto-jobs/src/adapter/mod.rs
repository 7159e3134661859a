//! Storage backends.
//!
//! Every backend implements [`JobAdapter`]. The adapter owns all persistent
//! job state; dispatchers and workers only ever go through these operations.

pub mod memory;
pub mod redis;
pub mod sql;

pub use memory::MemoryAdapter;
pub use self::redis::RedisAdapter;
pub use sql::SqlAdapter;

use crate::config::AdapterConfig;
use crate::error::JobResult;
use crate::job::JobId;
use crate::serialized::{now_millis, DeadJob, QueueStats, SerializedJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Backend contract for queued jobs.
///
/// Within a queue, `dequeue` hands out jobs ordered by `run_at` then
/// priority, and a job is leased to at most one worker at a time.
#[async_trait]
pub trait JobAdapter: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &'static str;

    /// Stores a job that is eligible immediately.
    async fn enqueue(&self, job: SerializedJob) -> JobResult<JobId> {
        self.enqueue_at(job, now_millis()).await
    }

    /// Stores a job that becomes eligible at `run_at`.
    async fn enqueue_at(&self, job: SerializedJob, run_at: DateTime<Utc>) -> JobResult<JobId>;

    /// Leases the next eligible job of `queue` to `worker_id`.
    ///
    /// `Ok(None)` means nothing is ready; errors are transport failures.
    async fn dequeue(&self, queue: &str, worker_id: &str) -> JobResult<Option<SerializedJob>>;

    /// Removes a finished job.
    ///
    /// Keyed on `(id, attempts)` like `retry`: a stale holder whose lease
    /// was already recovered cannot remove the current attempt.
    async fn complete(&self, job: &SerializedJob) -> JobResult<()>;

    /// Reschedules a leased job after a failed attempt.
    ///
    /// Increments `attempts`, records `error`, clears the lease and sets
    /// `run_at = max(now, previous run_at) + delay`. A second call for the
    /// same `(id, attempts)` is a no-op.
    async fn retry(&self, job: &SerializedJob, delay: Duration, error: &str) -> JobResult<()>;

    /// Returns a leased job to its queue without consuming an attempt.
    async fn release(&self, job: &SerializedJob) -> JobResult<()>;

    /// Moves a leased job to dead storage, preserving its fields.
    async fn dead(&self, job: &SerializedJob, error: &str) -> JobResult<()>;

    /// Per-queue counters.
    async fn stats(&self) -> JobResult<HashMap<String, QueueStats>>;

    /// Removes queued (not leased) jobs from one queue, or from all queues.
    async fn clear(&self, queue: Option<&str>) -> JobResult<u64>;

    /// Leased jobs whose lease started more than `ttl` ago.
    async fn expired_leases(&self, ttl: Duration) -> JobResult<Vec<SerializedJob>>;

    /// Most recent dead jobs, newest first.
    async fn dead_jobs(&self, queue: Option<&str>, limit: usize) -> JobResult<Vec<DeadJob>>;

    /// Backend health check.
    async fn ping(&self) -> JobResult<()>;

    /// Releases backend resources.
    async fn close(&self) -> JobResult<()>;
}

/// Builds the adapter selected by configuration.
pub async fn connect(config: &AdapterConfig) -> JobResult<Arc<dyn JobAdapter>> {
    info!(driver = config.driver(), "Connecting job adapter");
    let adapter: Arc<dyn JobAdapter> = match config {
        AdapterConfig::Memory => Arc::new(MemoryAdapter::new()),
        AdapterConfig::Redis(redis) => Arc::new(RedisAdapter::connect(redis).await?),
        AdapterConfig::Sql(sql) => Arc::new(SqlAdapter::connect(sql).await?),
    };
    Ok(adapter)
}

/// Computes the next `run_at` of a retried job; never earlier than the previous one.
pub(crate) fn next_run_at(previous: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let from = previous.max(now_millis());
    let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
    from.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Leases that started before this instant are expired.
pub(crate) fn lease_cutoff(ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    now_millis()
        .checked_sub_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Produces the record a retry stores.
pub(crate) fn retried(job: &SerializedJob, delay: Duration, error: &str) -> SerializedJob {
    let mut next = job.clone();
    next.attempts = job.attempts.saturating_add(1);
    next.run_at = next_run_at(job.run_at, delay);
    next.last_error = Some(error.to_string());
    next.unlock();
    next.updated_at = now_millis();
    next
}
