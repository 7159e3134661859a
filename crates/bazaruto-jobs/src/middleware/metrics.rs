use super::{Handler, Middleware};
use crate::metrics::JobMetrics;
use std::sync::Arc;
use std::time::Instant;

/// Counts attempts and observes their duration.
///
/// Every attempt increments `jobs_started_total` and exactly one of
/// `jobs_completed_total` or `jobs_failed_total`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Middleware for Metrics {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn wrap(&self, next: Handler) -> Handler {
        Arc::new(move |ctx, job| {
            let next = next.clone();
            Box::pin(async move {
                let queue = ctx.queue.clone();
                let job_type = ctx.job_type.clone();

                JobMetrics::job_started(&queue, &job_type);
                let started = Instant::now();
                let result = next(ctx, job).await;

                match &result {
                    Ok(()) => JobMetrics::job_completed(&queue, &job_type, started.elapsed()),
                    Err(_) => JobMetrics::job_failed(&queue, &job_type, started.elapsed()),
                }
                result
            })
        })
    }
}
