//! Recovery of leases abandoned by crashed workers.

use crate::adapter::JobAdapter;
use crate::backoff::BackoffPolicy;
use crate::config::LeaseConfig;
use crate::error::{JobError, JobResult};
use crate::metrics::JobMetrics;
use crate::registry::Registry;
use crate::worker::settle_failure;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error recorded on jobs whose lease expired.
pub const LEASE_EXPIRED: &str = "lease expired";

/// Periodically treats expired leases as failed attempts.
pub struct LeaseReaper {
    adapter: Arc<dyn JobAdapter>,
    registry: Arc<Registry>,
    backoff: BackoffPolicy,
    config: LeaseConfig,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl LeaseReaper {
    /// Creates a reaper.
    pub fn new(
        adapter: Arc<dyn JobAdapter>,
        registry: Arc<Registry>,
        backoff: BackoffPolicy,
        config: LeaseConfig,
    ) -> Self {
        Self {
            adapter,
            registry,
            backoff,
            config,
            task: Mutex::new(None),
        }
    }

    /// Runs one sweep and returns the number of leases recovered.
    ///
    /// Each expired job goes through the regular retry or dead-letter decision.
    pub async fn reap_once(&self) -> JobResult<usize> {
        sweep(
            self.adapter.as_ref(),
            &self.registry,
            &self.backoff,
            &self.config,
        )
        .await
    }

    /// Starts the periodic sweep.
    pub fn start(&self, parent: &CancellationToken) -> JobResult<()> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Err(JobError::AlreadyRunning("Lease reaper"));
        }

        let token = parent.child_token();
        let adapter = self.adapter.clone();
        let registry = self.registry.clone();
        let backoff = self.backoff;
        let config = self.config.clone();
        let stop = token.clone();

        info!(
            ttl_secs = config.ttl_secs,
            interval_secs = config.reap_interval_secs,
            "Starting lease reaper"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.reap_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = sweep(adapter.as_ref(), &registry, &backoff, &config).await {
                            warn!(error = %e, "Lease sweep failed");
                        }
                    }
                }
            }
            debug!("Lease reaper stopped");
        });

        *task = Some((token, handle));
        Ok(())
    }

    /// Stops the periodic sweep.
    pub async fn stop(&self) {
        let Some((token, handle)) = self.task.lock().take() else {
            return;
        };
        token.cancel();
        if let Err(e) = handle.await {
            warn!(error = %e, "Lease reaper task failed");
        }
        info!("Lease reaper stopped");
    }

    /// Returns true while the periodic sweep is running.
    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }
}

async fn sweep(
    adapter: &dyn JobAdapter,
    registry: &Registry,
    backoff: &BackoffPolicy,
    config: &LeaseConfig,
) -> JobResult<usize> {
    let expired = adapter.expired_leases(config.ttl()).await?;
    let count = expired.len();

    for job in expired {
        warn!(
            job_id = %job.id,
            job_type = %job.job_type,
            queue = %job.queue,
            locked_by = job.locked_by.as_deref().unwrap_or("unknown"),
            "Recovering expired lease"
        );
        JobMetrics::lease_reaped(&job.queue);
        let base = registry.backoff_base_for(&job);
        settle_failure(adapter, backoff, base, &job, LEASE_EXPIRED).await;
    }

    if count > 0 {
        info!(recovered = count, "Lease sweep completed");
    }
    Ok(count)
}
