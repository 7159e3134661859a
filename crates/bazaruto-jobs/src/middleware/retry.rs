use super::{Handler, Middleware};
use crate::backoff::BackoffPolicy;
use crate::error::JobError;
use std::sync::Arc;
use tracing::debug;

/// In-handler retry loop for short transient failures within one lease.
///
/// Distinct from the cross-attempt retry the worker performs through the
/// adapter. Only [`JobError::is_retryable`] errors are retried, and never
/// once the attempt's token is cancelled.
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    retries: u32,
    policy: BackoffPolicy,
}

impl Retry {
    /// Retries up to `retries` extra times, sleeping `policy.delay(n)` before try `n`.
    pub fn new(retries: u32, policy: BackoffPolicy) -> Self {
        Self { retries, policy }
    }

    /// A pass-through layer.
    pub fn disabled() -> Self {
        Self::new(0, BackoffPolicy::default())
    }
}

impl Middleware for Retry {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn wrap(&self, next: Handler) -> Handler {
        let retries = self.retries;
        let policy = self.policy;

        Arc::new(move |ctx, job| {
            let next = next.clone();
            Box::pin(async move {
                let mut tries = 0u32;
                loop {
                    let err = match next(ctx.clone(), job.clone()).await {
                        Ok(()) => return Ok(()),
                        Err(e) => e,
                    };

                    if tries >= retries || !err.is_retryable() || ctx.is_cancelled() {
                        return Err(err);
                    }
                    tries += 1;

                    let delay = policy.delay(tries);
                    debug!(
                        job_id = %ctx.job_id,
                        try_number = tries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Retrying job in handler"
                    );

                    tokio::select! {
                        () = ctx.cancellation().cancelled() => return Err(JobError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            })
        })
    }
}
