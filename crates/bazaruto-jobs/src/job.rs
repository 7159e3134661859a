//! Job trait and execution context.

use crate::error::JobResult;
use crate::serialized::SerializedJob;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique job identifier, assigned at enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Process-wide service locator handed to jobs at perform time.
///
/// Jobs carry only their payload; collaborators such as HTTP clients or
/// event publishers are looked up here by type.
#[derive(Clone, Default)]
pub struct Services {
    entries: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Services {
    /// Creates an empty locator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service, replacing any previous value of the same type.
    ///
    /// Trait objects are registered as `Arc<dyn Trait>`.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) {
        Arc::make_mut(&mut self.entries).insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Looks up a service by type.
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// Context of a single attempt.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job ID.
    pub job_id: JobId,

    /// Registered type name.
    pub job_type: String,

    /// Queue name.
    pub queue: String,

    /// Priority (higher runs first).
    pub priority: i32,

    /// Current attempt number (1-based).
    pub attempt: u32,

    /// Retry budget of the job.
    pub max_retries: u32,

    /// Identity of the worker holding the lease.
    pub worker_id: String,

    /// Deadline enforced by the timeout middleware.
    pub timeout: Duration,

    cancel: CancellationToken,
    services: Services,
}

impl JobContext {
    /// Builds the context for an attempt of a stored job.
    pub fn for_attempt(
        job: &SerializedJob,
        worker_id: impl Into<String>,
        timeout: Duration,
        cancel: CancellationToken,
        services: Services,
    ) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            queue: job.queue.clone(),
            priority: job.priority,
            attempt: job.attempts + 1,
            max_retries: job.max_retries,
            worker_id: worker_id.into(),
            timeout,
            cancel,
            services,
        }
    }

    /// Builds the context for a job executed in-process by a chain or batch.
    pub(crate) fn inline(
        job: &dyn DynJob,
        origin: impl Into<String>,
        max_retries: u32,
        timeout: Duration,
        cancel: CancellationToken,
        services: Services,
    ) -> Self {
        Self {
            job_id: JobId::new(),
            job_type: job.type_name().to_string(),
            queue: job.queue_name().to_string(),
            priority: job.priority_level(),
            attempt: 1,
            max_retries,
            worker_id: origin.into(),
            timeout,
            cancel,
            services,
        }
    }

    /// Cancellation token of this attempt.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns true once the attempt has been cancelled or timed out.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns a copy of this context bound to another token.
    #[must_use]
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    /// Looks up a collaborator registered with the engine.
    pub fn service<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.services.get::<T>()
    }

    /// Like [`service`](Self::service) but fails when the collaborator is missing.
    pub fn require_service<T: Clone + Send + Sync + 'static>(&self) -> JobResult<T> {
        self.service::<T>().ok_or_else(|| {
            crate::JobError::Configuration(format!(
                "service {} is not registered",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Returns true if a failure of this attempt exhausts the retry budget.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt > self.max_retries
    }
}

/// Trait for defining jobs.
///
/// The payload is the serde representation of the implementing type, so it
/// must use named fields. Per-instance settings default to the associated
/// constants; `None` inherits the worker defaults.
///
/// # Example
///
/// ```rust,ignore
/// use bazaruto_jobs::{Job, JobContext, JobResult};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct ExpireQuoteJob {
///     quote_id: String,
/// }
///
/// #[async_trait::async_trait]
/// impl Job for ExpireQuoteJob {
///     const NAME: &'static str = "expire_quote";
///     const QUEUE: &'static str = "low";
///
///     async fn perform(&self, ctx: &JobContext) -> JobResult<()> {
///         tracing::info!(quote_id = %self.quote_id, attempt = ctx.attempt, "Expiring quote");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type name used as the discriminator (case-insensitive).
    const NAME: &'static str;

    /// Queue name for this job type.
    const QUEUE: &'static str = "default";

    /// Priority within the queue.
    const PRIORITY: i32 = 0;

    /// Execute the job.
    async fn perform(&self, ctx: &JobContext) -> JobResult<()>;

    /// Queue for this instance.
    fn queue(&self) -> &str {
        Self::QUEUE
    }

    /// Priority for this instance.
    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    /// Retry budget.
    fn max_retries(&self) -> Option<u32> {
        None
    }

    /// Per-attempt deadline.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Base of the quadratic retry backoff.
    fn backoff_base(&self) -> Option<Duration> {
        None
    }
}

/// Type-erased view of a [`Job`], as produced by the registry.
#[async_trait]
pub trait DynJob: Send + Sync {
    /// Registered type name.
    fn type_name(&self) -> &'static str;

    /// Target queue.
    fn queue_name(&self) -> &str;

    /// Priority.
    fn priority_level(&self) -> i32;

    /// Retry budget override.
    fn retry_budget(&self) -> Option<u32>;

    /// Timeout override.
    fn time_limit(&self) -> Option<Duration>;

    /// Backoff base override.
    fn backoff(&self) -> Option<Duration>;

    /// Serializes the payload.
    fn to_payload(&self) -> JobResult<serde_json::Value>;

    /// Runs the job.
    async fn run(&self, ctx: &JobContext) -> JobResult<()>;
}

#[async_trait]
impl<J: Job> DynJob for J {
    fn type_name(&self) -> &'static str {
        J::NAME
    }

    fn queue_name(&self) -> &str {
        Job::queue(self)
    }

    fn priority_level(&self) -> i32 {
        Job::priority(self)
    }

    fn retry_budget(&self) -> Option<u32> {
        Job::max_retries(self)
    }

    fn time_limit(&self) -> Option<Duration> {
        Job::timeout(self)
    }

    fn backoff(&self) -> Option<Duration> {
        Job::backoff_base(self)
    }

    fn to_payload(&self) -> JobResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    async fn run(&self, ctx: &JobContext) -> JobResult<()> {
        self.perform(ctx).await
    }
}

impl fmt::Debug for dyn DynJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynJob")
            .field("type", &self.type_name())
            .field("queue", &self.queue_name())
            .field("priority", &self.priority_level())
            .finish()
    }
}
