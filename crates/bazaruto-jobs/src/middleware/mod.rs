//! Middleware pipeline around `Job::perform`.
//!
//! A [`Handler`] runs one attempt. Each [`Middleware`] wraps a handler into
//! another one; [`Pipeline::standard`] nests them as
//! recovery → logging → metrics → tracing → timeout → retry → perform.

mod logging;
mod metrics;
mod recovery;
mod retry;
mod span;
mod timeout;

pub use self::logging::Logging;
pub use self::metrics::Metrics;
pub use self::recovery::Recovery;
pub use self::retry::Retry;
pub use self::span::Tracing;
pub use self::timeout::Timeout;

use crate::backoff::BackoffPolicy;
use crate::config::WorkerConfig;
use crate::error::JobResult;
use crate::job::{DynJob, JobContext};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Runs one attempt of a job.
pub type Handler =
    Arc<dyn Fn(JobContext, Arc<dyn DynJob>) -> BoxFuture<'static, JobResult<()>> + Send + Sync>;

/// Wraps an async closure into a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(JobContext, Arc<dyn DynJob>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult<()>> + Send + 'static,
{
    Arc::new(move |ctx, job| Box::pin(f(ctx, job)))
}

/// The innermost handler: calls `perform` on the job.
pub fn perform() -> Handler {
    handler_fn(|ctx, job| async move { job.run(&ctx).await })
}

/// A layer of the pipeline.
pub trait Middleware: Send + Sync {
    /// Name used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Wraps `next` into a new handler.
    fn wrap(&self, next: Handler) -> Handler;
}

/// Ordered middleware stack, outermost first.
#[derive(Clone, Default)]
pub struct Pipeline {
    layers: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// The fixed worker stack.
    pub fn standard(config: &WorkerConfig) -> Self {
        let inner = BackoffPolicy::quadratic(config.inner_backoff());
        Self::new()
            .layer(Recovery)
            .layer(Logging)
            .layer(Metrics)
            .layer(Tracing)
            .layer(Timeout)
            .layer(Retry::new(config.inner_retries, inner))
    }

    /// Appends a layer inside the ones already present.
    #[must_use]
    pub fn layer<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    /// Layer names, outermost first.
    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|m| m.name()).collect()
    }

    /// Composes the layers around `terminal`.
    pub fn build(&self, terminal: Handler) -> Handler {
        self.layers
            .iter()
            .rev()
            .fold(terminal, |next, middleware| middleware.wrap(next))
    }

    /// Composes the layers around [`perform`].
    pub fn handler(&self) -> Handler {
        self.build(perform())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("layers", &self.names())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{context, job};
    use super::*;
    use crate::error::JobError;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Tag(&'static str, Arc<Mutex<Vec<&'static str>>>);

    impl Middleware for Tag {
        fn name(&self) -> &'static str {
            self.0
        }

        fn wrap(&self, next: Handler) -> Handler {
            let tag = self.0;
            let seen = self.1.clone();
            Arc::new(move |ctx, job| {
                seen.lock().push(tag);
                next(ctx, job)
            })
        }
    }

    #[test]
    fn test_standard_order() {
        let pipeline = Pipeline::standard(&WorkerConfig::default());
        assert_eq!(
            pipeline.names(),
            vec!["recovery", "logging", "metrics", "tracing", "timeout", "retry"]
        );
    }

    #[tokio::test]
    async fn test_outermost_runs_first() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .layer(Tag("outer", seen.clone()))
            .layer(Tag("inner", seen.clone()));

        let handler = pipeline.handler();
        handler(context(Duration::from_secs(1)), job()).await.unwrap();

        assert_eq!(*seen.lock(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn test_terminal_error_propagates() {
        let pipeline = Pipeline::standard(&WorkerConfig::default());
        let handler = pipeline.build(handler_fn(|_, _| async { Err(JobError::perform("declined")) }));

        let err = handler(context(Duration::from_secs(1)), job()).await.unwrap_err();
        assert!(matches!(err, JobError::Perform(msg) if msg == "declined"));
    }
}
