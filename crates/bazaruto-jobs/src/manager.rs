//! Engine composition and lifecycle.

use crate::adapter::{self, JobAdapter};
use crate::config::JobsConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{JobError, JobResult};
use crate::middleware::Pipeline;
use crate::reaper::LeaseReaper;
use crate::registry::{JobDefaults, Registry, RegistryBuilder};
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::serialized::QueueStats;
use crate::worker::{WorkerPool, WorkerPoolStats};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running,
    Closed,
}

/// Snapshot of the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    /// Adapter in use.
    pub adapter: &'static str,

    /// Per-queue counters from the adapter.
    pub queues: HashMap<String, QueueStats>,

    /// Worker pool counters.
    pub workers: WorkerPoolStats,

    /// Scheduler counters.
    pub scheduler: SchedulerStats,
}

/// Owns the adapter, registry, dispatcher, worker pool, lease reaper and scheduler.
pub struct JobManager {
    config: JobsConfig,
    adapter: Arc<dyn JobAdapter>,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    workers: WorkerPool,
    reaper: Option<LeaseReaper>,
    scheduler: Scheduler,
    state: Mutex<State>,
}

impl JobManager {
    /// Validates the configuration, connects the configured adapter and wires the engine.
    pub async fn new(config: JobsConfig, registry: RegistryBuilder) -> JobResult<Self> {
        config.validate()?;
        let adapter = adapter::connect(&config.adapter).await?;
        Self::with_adapter(config, adapter, registry)
    }

    /// Wires the engine around an existing adapter.
    pub fn with_adapter(
        config: JobsConfig,
        adapter: Arc<dyn JobAdapter>,
        mut registry: RegistryBuilder,
    ) -> JobResult<Self> {
        config.validate()?;

        let backoff = config.backoff.policy();
        registry.defaults(JobDefaults {
            max_retries: config.worker.default_max_retries,
            timeout: config.worker.default_timeout(),
            backoff_base: backoff.base,
            max_timeout: config.lease.attempt_limit(),
        });
        let registry = registry.build();

        let pipeline = Pipeline::standard(&config.worker);
        let dispatcher = Dispatcher::new(adapter.clone(), registry.clone(), &pipeline);
        let workers = WorkerPool::new(
            adapter.clone(),
            registry.clone(),
            &pipeline,
            backoff,
            config.worker.clone(),
        );
        let reaper = config.lease.enabled.then(|| {
            LeaseReaper::new(
                adapter.clone(),
                registry.clone(),
                backoff,
                config.lease.clone(),
            )
        });
        let scheduler = Scheduler::new(Arc::new(dispatcher.clone()), config.scheduler.clone());

        info!(
            adapter = adapter.name(),
            job_types = ?registry.type_names(),
            pipeline = ?pipeline,
            "Job manager ready"
        );

        Ok(Self {
            config,
            adapter,
            registry,
            dispatcher,
            workers,
            reaper,
            scheduler,
            state: Mutex::new(State::Idle),
        })
    }

    /// Starts the worker pool, lease reaper and (when enabled) the scheduler.
    ///
    /// Fails with [`JobError::AlreadyRunning`] when already started and with
    /// [`JobError::Closed`] after [`close`](Self::close).
    pub fn start(&self, parent: &CancellationToken) -> JobResult<()> {
        let mut state = self.state.lock();
        match *state {
            State::Running => return Err(JobError::AlreadyRunning("Job manager")),
            State::Closed => return Err(JobError::Closed),
            State::Idle => {}
        }

        self.workers.start(parent)?;
        if let Some(reaper) = &self.reaper {
            reaper.start(parent)?;
        }
        if self.config.scheduler.enabled {
            self.scheduler.start(parent)?;
        }

        *state = State::Running;
        info!(adapter = self.adapter.name(), "Job manager started");
        Ok(())
    }

    /// Stops polling and waits for in-flight attempts.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state != State::Running {
                return;
            }
            *state = State::Idle;
        }

        self.scheduler.stop().await;
        self.workers.stop().await;
        if let Some(reaper) = &self.reaper {
            reaper.stop().await;
        }
        info!("Job manager stopped");
    }

    /// Stops everything and closes the adapter. The manager cannot be restarted.
    pub async fn close(&self) -> JobResult<()> {
        self.stop().await;
        {
            let mut state = self.state.lock();
            if *state == State::Closed {
                return Ok(());
            }
            *state = State::Closed;
        }
        if let Err(e) = self.adapter.close().await {
            warn!(error = %e, "Failed to close job adapter");
            return Err(e);
        }
        info!("Job manager closed");
        Ok(())
    }

    /// Engine snapshot.
    pub async fn stats(&self) -> JobResult<ManagerStats> {
        Ok(ManagerStats {
            adapter: self.adapter.name(),
            queues: self.adapter.stats().await?,
            workers: self.workers.stats(),
            scheduler: self.scheduler.stats(),
        })
    }

    /// Returns true between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        *self.state.lock() == State::Running
    }

    /// Producer API.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Cron scheduler; schedules may be registered before or after `start`.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Frozen job registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Lease reaper, when enabled.
    pub fn reaper(&self) -> Option<&LeaseReaper> {
        self.reaper.as_ref()
    }

    /// Effective configuration.
    pub fn config(&self) -> &JobsConfig {
        &self.config
    }
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("adapter", &self.adapter.name())
            .field("queues", &self.config.worker.queues)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}
