use super::{Handler, Middleware};
use std::sync::Arc;
use tracing::{field, info_span, Instrument};

/// Runs each attempt inside a `job.<type>` span.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tracing;

impl Middleware for Tracing {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn wrap(&self, next: Handler) -> Handler {
        Arc::new(move |ctx, job| {
            let next = next.clone();
            let span = info_span!(
                "job",
                "otel.name" = %format!("job.{}", ctx.job_type),
                "otel.status_code" = field::Empty,
                "job.id" = %ctx.job_id,
                "job.type" = %ctx.job_type,
                "job.queue" = %ctx.queue,
                "job.priority" = ctx.priority,
                "job.attempt" = ctx.attempt,
                error = field::Empty,
            );

            let recorder = span.clone();
            Box::pin(
                async move {
                    let result = next(ctx, job).await;
                    if let Err(e) = &result {
                        recorder.record("otel.status_code", "ERROR");
                        recorder.record("error", field::display(e));
                    }
                    result
                }
                .instrument(span),
            )
        })
    }
}
