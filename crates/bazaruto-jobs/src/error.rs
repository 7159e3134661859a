//! Job error types.

use std::time::Duration;
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Errors surfaced by the job engine.
#[derive(Debug, Error)]
pub enum JobError {
    /// A stored job names a type that was never registered.
    #[error("Unknown job type: {0}")]
    UnknownType(String),

    /// The stored payload does not decode into the registered type.
    #[error("Failed to decode payload for job type {job_type}: {source}")]
    PayloadDecode {
        job_type: String,
        #[source]
        source: serde_json::Error,
    },

    /// A job type name was registered twice.
    #[error("Job type already registered: {0}")]
    DuplicateType(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Other backend failure (malformed rows, unexpected replies).
    #[error("Backend error: {0}")]
    Backend(String),

    /// The per-job deadline elapsed.
    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    /// The surrounding context was cancelled.
    #[error("Job was cancelled")]
    Cancelled,

    /// The job's `perform` returned an error.
    #[error("Job execution failed: {0}")]
    Perform(String),

    /// The job's `perform` panicked and the panic was recovered.
    #[error("Job panicked: {message}")]
    Panic { message: String, backtrace: String },

    /// A chain member failed; later members were abandoned.
    #[error("Chain step {index} ({job_type}) failed: {source}")]
    Chain {
        index: usize,
        job_type: String,
        #[source]
        source: Box<JobError>,
    },

    /// One or more batch members failed.
    #[error("Batch failed: {0}")]
    Batch(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A component was started twice.
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    /// The manager was closed and cannot be restarted.
    #[error("Job manager is closed")]
    Closed,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Convenience constructor for errors returned from `perform`.
    pub fn perform(message: impl Into<String>) -> Self {
        JobError::Perform(message.into())
    }

    /// Returns true for backend I/O failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            JobError::Redis(_) | JobError::Pool(_) | JobError::Database(_) | JobError::Backend(_)
        )
    }

    /// Returns true if the in-handler retry loop may try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobError::Perform(_)
                | JobError::Timeout(_)
                | JobError::Redis(_)
                | JobError::Pool(_)
                | JobError::Database(_)
                | JobError::Backend(_)
        )
    }

    /// Returns true if the job must skip the retry budget and go straight to dead storage.
    pub fn should_dead_letter(&self) -> bool {
        matches!(
            self,
            JobError::UnknownType(_) | JobError::PayloadDecode { .. }
        )
    }

    /// Short label used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::UnknownType(_) => "unknown_type",
            JobError::PayloadDecode { .. } => "payload_decode",
            JobError::Timeout(_) => "timeout",
            JobError::Cancelled => "cancelled",
            JobError::Perform(_) => "perform",
            JobError::Panic { .. } => "panic",
            e if e.is_transient() => "adapter",
            _ => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perform_error_is_retryable() {
        let err = JobError::perform("card declined");
        assert!(err.is_retryable());
        assert!(!err.should_dead_letter());
    }

    #[test]
    fn test_timeout_is_retryable() {
        assert!(JobError::Timeout(Duration::from_secs(5)).is_retryable());
    }

    #[test]
    fn test_cancelled_is_never_retried() {
        assert!(!JobError::Cancelled.is_retryable());
        assert!(!JobError::Cancelled.should_dead_letter());
    }

    #[test]
    fn test_panic_is_not_retried_in_handler() {
        let err = JobError::Panic {
            message: "index out of bounds".into(),
            backtrace: String::new(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "panic");
    }

    #[test]
    fn test_decode_failures_dead_letter() {
        assert!(JobError::UnknownType("ghost".into()).should_dead_letter());

        let source = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        let err = JobError::PayloadDecode {
            job_type: "deliver_webhook".into(),
            source,
        };
        assert!(err.should_dead_letter());
        assert!(err.to_string().contains("deliver_webhook"));
    }

    #[test]
    fn test_backend_error_is_transient() {
        let err = JobError::Backend("connection reset".into());
        assert!(err.is_transient());
        assert_eq!(err.kind(), "adapter");
    }

    #[test]
    fn test_chain_error_display() {
        let err = JobError::Chain {
            index: 1,
            job_type: "charge_card".into(),
            source: Box::new(JobError::perform("declined")),
        };
        let msg = err.to_string();
        assert!(msg.contains("Chain step 1") && msg.contains("charge_card"));
    }

    #[test]
    fn test_already_running_display() {
        let err = JobError::AlreadyRunning("Worker pool");
        assert_eq!(err.to_string(), "Worker pool is already running");
    }
}
