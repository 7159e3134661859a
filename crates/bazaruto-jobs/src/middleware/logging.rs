use super::{Handler, Middleware};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Logs the start and outcome of every attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct Logging;

impl Middleware for Logging {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn wrap(&self, next: Handler) -> Handler {
        Arc::new(move |ctx, job| {
            let next = next.clone();
            Box::pin(async move {
                let job_id = ctx.job_id;
                let job_type = ctx.job_type.clone();
                let queue = ctx.queue.clone();
                let priority = ctx.priority;
                let attempt = ctx.attempt;
                let last_attempt = ctx.is_last_attempt();

                info!(
                    job_id = %job_id,
                    job_type = %job_type,
                    queue = %queue,
                    priority,
                    attempt,
                    worker_id = %ctx.worker_id,
                    "Job started"
                );

                let started = Instant::now();
                let result = next(ctx, job).await;
                let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

                match &result {
                    Ok(()) => info!(
                        job_id = %job_id,
                        job_type = %job_type,
                        queue = %queue,
                        priority,
                        attempt,
                        duration_ms,
                        outcome = "completed",
                        "Job completed"
                    ),
                    Err(e) if last_attempt => error!(
                        job_id = %job_id,
                        job_type = %job_type,
                        queue = %queue,
                        priority,
                        attempt,
                        duration_ms,
                        outcome = e.kind(),
                        error = %e,
                        "Job failed on its last attempt"
                    ),
                    Err(e) => warn!(
                        job_id = %job_id,
                        job_type = %job_type,
                        queue = %queue,
                        priority,
                        attempt,
                        duration_ms,
                        outcome = e.kind(),
                        error = %e,
                        "Job failed"
                    ),
                }

                result
            })
        })
    }
}
