use super::{Handler, Middleware};
use crate::error::JobError;
use std::sync::Arc;
use tracing::warn;

/// Enforces the per-job deadline carried by the context.
///
/// Downstream handlers receive a child token that is cancelled when the
/// deadline passes, so cooperative jobs can stop early. Cancellation of the
/// parent token ends the attempt with [`JobError::Cancelled`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Timeout;

impl Middleware for Timeout {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn wrap(&self, next: Handler) -> Handler {
        Arc::new(move |ctx, job| {
            let next = next.clone();
            Box::pin(async move {
                let deadline = ctx.timeout;
                let parent = ctx.cancellation().clone();
                let child = parent.child_token();
                let job_id = ctx.job_id;
                let attempt = next(ctx.with_cancellation(child.clone()), job);

                tokio::select! {
                    biased;
                    () = parent.cancelled() => {
                        child.cancel();
                        Err(JobError::Cancelled)
                    }
                    result = tokio::time::timeout(deadline, attempt) => match result {
                        Ok(result) => result,
                        Err(_) => {
                            child.cancel();
                            warn!(job_id = %job_id, timeout = ?deadline, "Job timed out");
                            Err(JobError::Timeout(deadline))
                        }
                    },
                }
            })
        })
    }
}
