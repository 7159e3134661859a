//! Concurrent job composition with fan-in.

use crate::dispatcher::InlineRunner;
use crate::error::{JobError, JobResult};
use crate::job::{DynJob, Job};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Runs its members concurrently.
pub struct Batch {
    id: Uuid,
    jobs: Vec<Arc<dyn DynJob>>,
    runner: InlineRunner,
}

impl Batch {
    pub(crate) fn new(runner: InlineRunner, jobs: impl IntoIterator<Item = Box<dyn DynJob>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            jobs: jobs.into_iter().map(Arc::from).collect(),
            runner,
        }
    }

    /// Adds a job.
    #[must_use]
    pub fn add<J: Job>(mut self, job: J) -> Self {
        self.jobs.push(Arc::new(job));
        self
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if the batch has no members.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Spawns every member and returns a handle observing their completion.
    ///
    /// Each member gets a child of `cancel`.
    pub fn start(self, cancel: &CancellationToken) -> BatchHandle {
        let total = self.jobs.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let origin = format!("batch-{}", self.id);
        info!(batch_id = %self.id, jobs = total, "Batch started");

        let children: FuturesUnordered<_> = self
            .jobs
            .into_iter()
            .enumerate()
            .map(|(index, job)| {
                let runner = self.runner.clone();
                let origin = origin.clone();
                let token = cancel.child_token();
                let completed = completed.clone();
                let job_type = job.type_name();

                let task = tokio::spawn(async move {
                    let result = runner.run(job, &origin, token).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    result
                });
                async move { (index, job_type, task.await) }
            })
            .collect();

        let batch_id = self.id;
        let collector = tokio::spawn(async move {
            let mut failures: Vec<BatchFailure> = children
                .filter_map(|(index, job_type, joined)| async move {
                    let error = match joined {
                        Ok(Ok(())) => return None,
                        Ok(Err(e)) => e.to_string(),
                        Err(e) => format!("task failed: {e}"),
                    };
                    Some(BatchFailure {
                        index,
                        job_type: job_type.to_string(),
                        error,
                    })
                })
                .collect()
                .await;
            failures.sort_by_key(|f| f.index);

            if failures.is_empty() {
                info!(batch_id = %batch_id, jobs = total, "Batch completed");
            } else {
                warn!(batch_id = %batch_id, jobs = total, failed = failures.len(), "Batch completed with failures");
            }

            BatchReport {
                total,
                completed: total,
                failures,
            }
        });

        BatchHandle {
            id: self.id,
            total,
            completed,
            collector,
        }
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

/// Observes a running batch.
#[derive(Debug)]
pub struct BatchHandle {
    id: Uuid,
    total: usize,
    completed: Arc<AtomicUsize>,
    collector: JoinHandle<BatchReport>,
}

impl BatchHandle {
    /// Batch identifier used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// `(finished, total)`.
    pub fn progress(&self) -> (usize, usize) {
        (self.completed.load(Ordering::SeqCst), self.total)
    }

    /// Returns true once every member has finished.
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::SeqCst) >= self.total
    }

    /// Waits for every member.
    pub async fn wait(self) -> JobResult<BatchReport> {
        self.collector
            .await
            .map_err(|e| JobError::Internal(format!("batch collector failed: {e}")))
    }
}

/// One failed member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    /// Position in the batch.
    pub index: usize,

    /// Registered type name.
    pub job_type: String,

    /// Rendered error.
    pub error: String,
}

/// Outcome of a finished batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Members in the batch.
    pub total: usize,

    /// Members that finished, successfully or not.
    pub completed: usize,

    /// Members that failed, by position.
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    /// Members that succeeded.
    pub fn succeeded(&self) -> usize {
        self.completed - self.failures.len()
    }

    /// Returns true if no member failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Collapses the report into a single error listing every failed member.
    pub fn into_result(self) -> JobResult<()> {
        if self.failures.is_empty() {
            return Ok(());
        }
        let message = self
            .failures
            .iter()
            .map(|f| format!("[{}] {}: {}", f.index, f.job_type, f.error))
            .collect::<Vec<_>>()
            .join("; ");
        Err(JobError::Batch(message))
    }
}
