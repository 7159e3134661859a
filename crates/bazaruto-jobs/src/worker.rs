//! Worker pool: polls queues, runs attempts, settles their outcome.

use crate::adapter::JobAdapter;
use crate::backoff::BackoffPolicy;
use crate::config::WorkerConfig;
use crate::error::{JobError, JobResult};
use crate::job::{DynJob, JobContext};
use crate::metrics::JobMetrics;
use crate::middleware::{Handler, Pipeline};
use crate::registry::Registry;
use crate::serialized::SerializedJob;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Time granted to cancelled attempts to release their lease before tasks are aborted.
const RELEASE_GRACE: Duration = Duration::from_secs(5);

/// Pool-wide counters.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    in_flight: AtomicUsize,
}

/// What happened to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    Retried,
    DeadLettered,
}

/// Applies the cross-attempt retry decision to a failed job.
///
/// With `attempts < max_retries` the job is rescheduled after the backoff
/// for its next attempt; otherwise it moves to dead storage with the final
/// attempt counted. Adapter errors are logged, never returned.
pub(crate) async fn settle_failure(
    adapter: &dyn JobAdapter,
    backoff: &BackoffPolicy,
    base: Duration,
    job: &SerializedJob,
    error: &str,
) -> Settlement {
    if job.attempts < job.max_retries {
        let delay = backoff.delay_with(base, job.attempts + 1);
        if let Err(e) = adapter.retry(job, delay, error).await {
            error!(job_id = %job.id, error = %e, "Failed to reschedule job");
        }
        JobMetrics::job_retried(&job.queue, &job.job_type);
        debug!(
            job_id = %job.id,
            attempts = job.attempts + 1,
            max_retries = job.max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Job rescheduled"
        );
        Settlement::Retried
    } else {
        let mut last = job.clone();
        last.attempts = job.attempts.saturating_add(1);
        bury(adapter, &last, error, "exhausted").await;
        Settlement::DeadLettered
    }
}

/// Moves a leased job to dead storage.
pub(crate) async fn bury(adapter: &dyn JobAdapter, job: &SerializedJob, error: &str, reason: &str) {
    if let Err(e) = adapter.dead(job, error).await {
        error!(job_id = %job.id, error = %e, "Failed to move job to dead storage");
    }
    JobMetrics::job_dead_lettered(&job.queue, &job.job_type, reason);
    warn!(
        job_id = %job.id,
        job_type = %job.job_type,
        queue = %job.queue,
        attempts = job.attempts,
        reason,
        error,
        "Job moved to dead storage"
    );
}

struct Shared {
    adapter: Arc<dyn JobAdapter>,
    registry: Arc<Registry>,
    handler: Handler,
    backoff: BackoffPolicy,
    config: WorkerConfig,
    counters: Counters,
}

struct Running {
    stop: CancellationToken,
    jobs: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Fixed-size pool of workers sharing one adapter.
pub struct WorkerPool {
    id: String,
    shared: Arc<Shared>,
    running: AtomicBool,
    run: Mutex<Option<Running>>,
}

impl WorkerPool {
    /// Creates a pool; attempts run through `pipeline`.
    pub fn new(
        adapter: Arc<dyn JobAdapter>,
        registry: Arc<Registry>,
        pipeline: &Pipeline,
        backoff: BackoffPolicy,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: format!("worker-{}", Uuid::new_v4()),
            shared: Arc::new(Shared {
                adapter,
                registry,
                handler: pipeline.handler(),
                backoff,
                config,
                counters: Counters::default(),
            }),
            running: AtomicBool::new(false),
            run: Mutex::new(None),
        }
    }

    /// Spawns `concurrency` workers.
    ///
    /// Cancelling `parent` stops polling and cancels in-flight attempts.
    pub fn start(&self, parent: &CancellationToken) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::AlreadyRunning("Worker pool"));
        }

        let config = &self.shared.config;
        info!(
            pool_id = %self.id,
            concurrency = config.concurrency,
            queues = ?config.queues,
            "Starting worker pool"
        );

        let stop = parent.child_token();
        let jobs = parent.child_token();
        let tasks = (0..config.concurrency)
            .map(|n| {
                let worker = Worker {
                    id: format!("{}:{}", self.id, n),
                    shared: self.shared.clone(),
                    stop: stop.clone(),
                    jobs: jobs.clone(),
                };
                let span = tracing::info_span!("worker", worker_id = %worker.id);
                tokio::spawn(worker.run().instrument(span))
            })
            .collect();

        *self.run.lock() = Some(Running { stop, jobs, tasks });
        Ok(())
    }

    /// Stops polling and waits for in-flight attempts.
    ///
    /// Attempts still running after `shutdown_timeout` are cancelled and
    /// their leases released; tasks that do not finish are aborted.
    pub async fn stop(&self) {
        let Some(Running {
            stop,
            jobs,
            mut tasks,
        }) = self.run.lock().take()
        else {
            return;
        };

        info!(pool_id = %self.id, "Stopping worker pool...");
        stop.cancel();

        let timeout = self.shared.config.shutdown_timeout();
        if tokio::time::timeout(timeout, join_all(tasks.iter_mut())).await.is_err() {
            warn!(
                pool_id = %self.id,
                in_flight = self.shared.counters.in_flight.load(Ordering::SeqCst),
                "Shutdown timeout reached, cancelling in-flight jobs"
            );
            jobs.cancel();
            tasks.retain(|task| !task.is_finished());
            if tokio::time::timeout(RELEASE_GRACE, join_all(tasks.iter_mut()))
                .await
                .is_err()
            {
                for task in &tasks {
                    task.abort();
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        let counters = &self.shared.counters;
        info!(
            pool_id = %self.id,
            processed = counters.processed.load(Ordering::Relaxed),
            failed = counters.failed.load(Ordering::Relaxed),
            "Worker pool stopped"
        );
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the pool ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get pool statistics.
    pub fn stats(&self) -> WorkerPoolStats {
        let counters = &self.shared.counters;
        WorkerPoolStats {
            id: self.id.clone(),
            running: self.is_running(),
            concurrency: self.shared.config.concurrency,
            queues: self.shared.config.queues.clone(),
            in_flight: counters.in_flight.load(Ordering::SeqCst),
            processed: counters.processed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
            dead_lettered: counters.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Worker pool statistics.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerPoolStats {
    /// Pool ID.
    pub id: String,

    /// Is running.
    pub running: bool,

    /// Configured concurrency.
    pub concurrency: usize,

    /// Queues being processed, in preference order.
    pub queues: Vec<String>,

    /// Attempts currently executing.
    pub in_flight: usize,

    /// Attempts that succeeded.
    pub processed: u64,

    /// Attempts that failed.
    pub failed: u64,

    /// Failed attempts rescheduled.
    pub retried: u64,

    /// Jobs moved to dead storage.
    pub dead_lettered: u64,
}

struct Worker {
    id: String,
    shared: Arc<Shared>,
    stop: CancellationToken,
    jobs: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker_id = %self.id, "Worker started");

        'poll: while !self.stop.is_cancelled() {
            let mut idle = true;
            for queue in &self.shared.config.queues {
                if self.stop.is_cancelled() {
                    break 'poll;
                }
                let Some(job) = self.fetch(queue).await else {
                    continue;
                };
                idle = false;
                if !self.process(job).await {
                    break 'poll;
                }
                // Restart from the first queue.
                break;
            }

            if idle {
                tokio::select! {
                    () = self.stop.cancelled() => break,
                    () = tokio::time::sleep(self.shared.config.poll_interval()) => {}
                }
            }
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }

    /// Bounded dequeue; transport failures count as no work.
    async fn fetch(&self, queue: &str) -> Option<SerializedJob> {
        let dequeue = self.shared.adapter.dequeue(queue, &self.id);
        match tokio::time::timeout(self.shared.config.dequeue_timeout(), dequeue).await {
            Ok(Ok(job)) => job,
            Ok(Err(e)) => {
                warn!(worker_id = %self.id, queue, error = %e, "Failed to dequeue job");
                None
            }
            Err(_) => {
                warn!(worker_id = %self.id, queue, "Dequeue timed out");
                None
            }
        }
    }

    /// Runs one attempt. Returns false when the worker must exit.
    async fn process(&self, job: SerializedJob) -> bool {
        let shared = &self.shared;
        let counters = &shared.counters;

        let runnable: Arc<dyn DynJob> = match shared.registry.deserialize(&job) {
            Ok(runnable) => Arc::from(runnable),
            Err(e) => {
                error!(job_id = %job.id, job_type = %job.job_type, error = %e, "Cannot decode job");
                counters.failed.fetch_add(1, Ordering::Relaxed);
                counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                bury(shared.adapter.as_ref(), &job, &e.to_string(), e.kind()).await;
                return true;
            }
        };

        let ctx = JobContext::for_attempt(
            &job,
            self.id.clone(),
            shared.registry.timeout_for(runnable.as_ref()),
            self.jobs.clone(),
            shared.registry.services().clone(),
        );
        let base = runnable
            .backoff()
            .unwrap_or(shared.registry.defaults().backoff_base);

        counters.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = (shared.handler)(ctx, runnable).await;
        counters.in_flight.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(()) => {
                counters.processed.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = shared.adapter.complete(&job).await {
                    error!(job_id = %job.id, error = %e, "Failed to mark job as complete");
                }
                true
            }
            Err(JobError::Cancelled) if self.jobs.is_cancelled() => {
                info!(job_id = %job.id, "Job interrupted by shutdown, releasing lease");
                if let Err(e) = shared.adapter.release(&job).await {
                    error!(job_id = %job.id, error = %e, "Failed to release job");
                }
                false
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                let settlement =
                    settle_failure(shared.adapter.as_ref(), &shared.backoff, base, &job, &e.to_string()).await;
                match settlement {
                    Settlement::Retried => counters.retried.fetch_add(1, Ordering::Relaxed),
                    Settlement::DeadLettered => counters.dead_lettered.fetch_add(1, Ordering::Relaxed),
                };
                true
            }
        }
    }
}
