//! Shared jobs and helpers for the engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bazaruto_jobs::{
    Job, JobAdapter, JobContext, JobError, JobId, JobResult, JobsConfig, QueueStats,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Records which job ran, on which attempt, and in what order.
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<(String, JobId, u32)>>,
}

impl Recorder {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, label: impl Into<String>, ctx: &JobContext) {
        self.events.lock().push((label.into(), ctx.job_id, ctx.attempt));
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().iter().map(|(label, _, _)| label.clone()).collect()
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.events.lock().iter().map(|(_, id, _)| *id).collect()
    }

    pub fn attempts(&self) -> Vec<u32> {
        self.events.lock().iter().map(|(_, _, attempt)| *attempt).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }
}

/// Issues a policy document; always succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuePolicy {
    pub label: String,
}

#[async_trait]
impl Job for IssuePolicy {
    const NAME: &'static str = "issue_policy";

    async fn perform(&self, ctx: &JobContext) -> JobResult<()> {
        let recorder: Arc<Recorder> = ctx.require_service()?;
        recorder.record(&self.label, ctx);
        Ok(())
    }
}

/// Charges a card against a gateway that is always down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeCard {
    pub label: String,
    pub retries: u32,
}

#[async_trait]
impl Job for ChargeCard {
    const NAME: &'static str = "charge_card";

    async fn perform(&self, ctx: &JobContext) -> JobResult<()> {
        let recorder: Arc<Recorder> = ctx.require_service()?;
        recorder.record(&self.label, ctx);
        Err(JobError::perform("payment gateway unavailable"))
    }

    fn max_retries(&self) -> Option<u32> {
        Some(self.retries)
    }

    fn backoff_base(&self) -> Option<Duration> {
        Some(Duration::from_millis(1))
    }
}

/// Renders a report slowly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderReport {
    pub millis: u64,
}

#[async_trait]
impl Job for RenderReport {
    const NAME: &'static str = "render_report";

    async fn perform(&self, ctx: &JobContext) -> JobResult<()> {
        let recorder: Arc<Recorder> = ctx.require_service()?;
        recorder.record("started", ctx);
        tokio::time::sleep(Duration::from_millis(self.millis)).await;
        recorder.record("finished", ctx);
        Ok(())
    }
}

/// Tracks how many attempts run at once.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self.clone())
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Leaves the gauge when the attempt ends, including when its future is dropped.
pub struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Reconciles the ledger for longer than any lease allows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileLedger {
    pub millis: u64,
}

#[async_trait]
impl Job for ReconcileLedger {
    const NAME: &'static str = "reconcile_ledger";

    async fn perform(&self, ctx: &JobContext) -> JobResult<()> {
        let recorder: Arc<Recorder> = ctx.require_service()?;
        let in_flight: Arc<InFlight> = ctx.require_service()?;
        let _guard = in_flight.enter();
        recorder.record("started", ctx);
        tokio::time::sleep(Duration::from_millis(self.millis)).await;
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(30))
    }

    fn backoff_base(&self) -> Option<Duration> {
        Some(Duration::from_millis(1))
    }
}

/// Memory-backed configuration with fast polling and no jitter.
pub fn fast_config(concurrency: usize) -> JobsConfig {
    let mut config = JobsConfig::default();
    config.worker.queues = vec!["default".to_string()];
    config.worker.concurrency = concurrency;
    config.worker.poll_interval_ms = 5;
    config.worker.shutdown_timeout_secs = 5;
    config.backoff.base_ms = 1;
    config.backoff.jitter_factor = 0.0;
    config
}

/// Counters of one queue; an unknown queue reads as empty.
pub async fn queue_stats(adapter: &dyn JobAdapter, queue: &str) -> QueueStats {
    adapter
        .stats()
        .await
        .expect("stats failed")
        .remove(queue)
        .unwrap_or_default()
}

/// Polls `check` until it returns true or `limit` elapses.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
