//! Cron scheduler for recurring jobs.
//!
//! Fires in-process; in a multi-instance deployment exactly one instance
//! enables it through configuration.

use crate::config::SchedulerConfig;
use crate::dispatcher::Enqueuer;
use crate::error::{JobError, JobResult};
use crate::job::{DynJob, Job, JobId};
use crate::metrics::SchedulerMetrics;
use chrono::{DateTime, Utc};
use cron::Schedule;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

type Factory = Arc<dyn Fn() -> Box<dyn DynJob> + Send + Sync>;

/// Scheduled job definition.
#[derive(Clone)]
pub struct ScheduledJob {
    /// Unique name for this scheduled job.
    pub name: String,

    /// Cron expression.
    pub cron: String,

    schedule: Schedule,
    factory: Factory,
    next_run: Option<DateTime<Utc>>,

    /// Is job enabled.
    pub enabled: bool,
}

impl std::fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("name", &self.name)
            .field("cron", &self.cron)
            .field("enabled", &self.enabled)
            .field("next_run", &self.next_run)
            .finish()
    }
}

impl ScheduledJob {
    /// Create a new scheduled job. Expressions use the six-field form with seconds.
    pub fn new<J: Job>(
        name: impl Into<String>,
        cron_expr: &str,
        job_factory: impl Fn() -> J + Send + Sync + 'static,
    ) -> JobResult<Self> {
        let schedule = Schedule::from_str(cron_expr)
            .map_err(|e| JobError::Configuration(format!("Invalid cron expression: {e}")))?;
        let next_run = schedule.upcoming(Utc).next();

        Ok(Self {
            name: name.into(),
            cron: cron_expr.to_string(),
            schedule,
            factory: Arc::new(move || Box::new(job_factory()) as Box<dyn DynJob>),
            next_run,
            enabled: true,
        })
    }

    /// Set whether the job is enabled.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Calculate the next run time after `from`.
    pub fn next_run_from(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// Next pending fire time.
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.next_run
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run.is_some_and(|at| at <= now)
    }
}

/// Scheduler statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    /// Scheduler ID.
    pub id: String,

    /// Is the tick loop running.
    pub running: bool,

    /// Number of scheduled jobs.
    pub scheduled_jobs: usize,

    /// Schedules fired so far.
    pub jobs_triggered: u64,
}

/// Information about a scheduled job.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJobInfo {
    /// Job name.
    pub name: String,

    /// Cron expression.
    pub cron: String,

    /// Is enabled.
    pub enabled: bool,

    /// Next scheduled run time.
    pub next_run: Option<DateTime<Utc>>,
}

struct Inner {
    enqueuer: Arc<dyn Enqueuer>,
    jobs: RwLock<HashMap<String, ScheduledJob>>,
    triggered: AtomicU64,
}

impl Inner {
    /// Enqueues every schedule due at `now` and advances it.
    async fn fire_due(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<(String, Box<dyn DynJob>)> = {
            let mut jobs = self.jobs.write();
            jobs.values_mut()
                .filter(|job| job.is_due(now))
                .map(|job| {
                    job.next_run = job.next_run_from(now);
                    (job.name.clone(), (job.factory)())
                })
                .collect()
        };

        let mut fired = 0;
        for (name, job) in due {
            match self.enqueuer.enqueue(job, None).await {
                Ok(job_id) => {
                    debug!(schedule = %name, job_id = %job_id, "Enqueued scheduled job");
                    SchedulerMetrics::job_triggered(&name);
                    self.triggered.fetch_add(1, Ordering::Relaxed);
                    fired += 1;
                }
                Err(e) => {
                    error!(schedule = %name, error = %e, "Failed to enqueue scheduled job");
                }
            }
        }
        fired
    }
}

/// Cron scheduler.
pub struct Scheduler {
    id: String,
    config: SchedulerConfig,
    inner: Arc<Inner>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Scheduler {
    /// Create a new scheduler dispatching through `enqueuer`.
    pub fn new(enqueuer: Arc<dyn Enqueuer>, config: SchedulerConfig) -> Self {
        Self {
            id: format!("scheduler-{}", Uuid::new_v4()),
            config,
            inner: Arc::new(Inner {
                enqueuer,
                jobs: RwLock::new(HashMap::new()),
                triggered: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Register a scheduled job, replacing one with the same name.
    pub fn register(&self, job: ScheduledJob) {
        let name = job.name.clone();
        self.inner.jobs.write().insert(name.clone(), job);
        info!(schedule = %name, "Registered scheduled job");
    }

    /// Register a job with cron expression.
    pub fn schedule<J: Job>(
        &self,
        name: impl Into<String>,
        cron_expr: &str,
        job_factory: impl Fn() -> J + Send + Sync + 'static,
    ) -> JobResult<()> {
        self.register(ScheduledJob::new(name, cron_expr, job_factory)?);
        Ok(())
    }

    /// Unregister a scheduled job.
    pub fn unregister(&self, name: &str) -> Option<ScheduledJob> {
        self.inner.jobs.write().remove(name)
    }

    /// Get scheduler ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Start the tick loop.
    pub fn start(&self, parent: &CancellationToken) -> JobResult<()> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Err(JobError::AlreadyRunning("Scheduler"));
        }

        info!(
            scheduler_id = %self.id,
            tick_interval_ms = self.config.tick_interval_ms,
            "Starting scheduler"
        );

        let token = parent.child_token();
        let stop = token.clone();
        let inner = self.inner.clone();
        let tick = self.config.tick_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.fire_due(Utc::now()).await;
                    }
                }
            }
        });

        *task = Some((token, handle));
        Ok(())
    }

    /// Stop the tick loop.
    pub async fn stop(&self) {
        let Some((token, handle)) = self.task.lock().take() else {
            return;
        };
        info!(scheduler_id = %self.id, "Stopping scheduler...");
        token.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "Scheduler task failed");
        }
        info!(scheduler_id = %self.id, "Scheduler stopped");
    }

    /// Fires every schedule due at `now`; returns how many were enqueued.
    pub async fn run_due(&self, now: DateTime<Utc>) -> usize {
        self.inner.fire_due(now).await
    }

    /// Get scheduler statistics.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            id: self.id.clone(),
            running: self.task.lock().is_some(),
            scheduled_jobs: self.inner.jobs.read().len(),
            jobs_triggered: self.inner.triggered.load(Ordering::Relaxed),
        }
    }

    /// List all registered scheduled jobs.
    pub fn list_jobs(&self) -> Vec<ScheduledJobInfo> {
        let mut jobs: Vec<_> = self
            .inner
            .jobs
            .read()
            .values()
            .map(|job| ScheduledJobInfo {
                name: job.name.clone(),
                cron: job.cron.clone(),
                enabled: job.enabled,
                next_run: job.next_run,
            })
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    /// Enable a scheduled job.
    pub fn enable_job(&self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    /// Disable a scheduled job.
    pub fn disable_job(&self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.inner.jobs.write().get_mut(name) {
            Some(job) => {
                job.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Trigger a scheduled job immediately.
    pub async fn trigger_job(&self, name: &str) -> JobResult<JobId> {
        let job = {
            let jobs = self.inner.jobs.read();
            let scheduled = jobs
                .get(name)
                .ok_or_else(|| JobError::Configuration(format!("Scheduled job not found: {name}")))?;
            (scheduled.factory)()
        };
        self.inner.enqueuer.enqueue(job, None).await
    }
}

/// Common cron expressions.
pub mod cron_expressions {
    /// Every minute.
    pub const EVERY_MINUTE: &str = "0 * * * * *";

    /// Every 5 minutes.
    pub const EVERY_5_MINUTES: &str = "0 */5 * * * *";

    /// Every 15 minutes.
    pub const EVERY_15_MINUTES: &str = "0 */15 * * * *";

    /// Every hour.
    pub const EVERY_HOUR: &str = "0 0 * * * *";

    /// Every day at midnight.
    pub const DAILY_MIDNIGHT: &str = "0 0 0 * * *";
}
