//! Sequential job composition.

use crate::dispatcher::InlineRunner;
use crate::error::{JobError, JobResult};
use crate::job::{DynJob, Job};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs its members one after another.
///
/// A member starts only after the previous one succeeded. The first failure
/// abandons the rest and is reported with its position.
pub struct Chain {
    id: Uuid,
    jobs: Vec<Arc<dyn DynJob>>,
    runner: InlineRunner,
}

impl Chain {
    pub(crate) fn new(runner: InlineRunner, jobs: impl IntoIterator<Item = Box<dyn DynJob>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            jobs: jobs.into_iter().map(Arc::from).collect(),
            runner,
        }
    }

    /// Appends a job.
    #[must_use]
    pub fn then<J: Job>(mut self, job: J) -> Self {
        self.jobs.push(Arc::new(job));
        self
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if the chain has no members.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Runs the chain to completion or to its first failure.
    ///
    /// Cancelling `cancel` aborts the running member and skips the rest.
    pub async fn run(self, cancel: &CancellationToken) -> JobResult<()> {
        let origin = format!("chain-{}", self.id);
        let total = self.jobs.len();
        info!(chain_id = %self.id, jobs = total, "Chain started");

        for (index, job) in self.jobs.into_iter().enumerate() {
            let job_type = job.type_name();

            let result = if cancel.is_cancelled() {
                Err(JobError::Cancelled)
            } else {
                self.runner.run(job, &origin, cancel.clone()).await
            };

            if let Err(source) = result {
                warn!(
                    chain_id = %self.id,
                    index,
                    job_type,
                    error = %source,
                    "Chain aborted"
                );
                return Err(JobError::Chain {
                    index,
                    job_type: job_type.to_string(),
                    source: Box::new(source),
                });
            }
            debug!(chain_id = %self.id, index, job_type, "Chain step completed");
        }

        info!(chain_id = %self.id, jobs = total, "Chain completed");
        Ok(())
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("id", &self.id)
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}
