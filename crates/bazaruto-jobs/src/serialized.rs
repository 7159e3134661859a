//! Persistent job records shared by every adapter.

use crate::error::JobResult;
use crate::job::JobId;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// A queued job as stored by an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedJob {
    /// Job ID.
    pub id: JobId,

    /// Registered type name.
    #[serde(rename = "type")]
    pub job_type: String,

    /// JSON payload of the job.
    pub payload: serde_json::Value,

    /// Queue name.
    pub queue: String,

    /// Priority (higher runs first).
    pub priority: i32,

    /// Retry budget.
    pub max_retries: u32,

    /// Completed attempts so far.
    pub attempts: u32,

    /// Earliest time the job may be dequeued.
    pub run_at: DateTime<Utc>,

    /// Start of the current lease.
    pub locked_at: Option<DateTime<Utc>>,

    /// Worker holding the current lease.
    pub locked_by: Option<String>,

    /// Set once the job is dead-lettered.
    pub failed_at: Option<DateTime<Utc>>,

    /// Error from the latest failed attempt.
    pub last_error: Option<String>,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// Last time an adapter touched the record.
    pub updated_at: DateTime<Utc>,
}

impl SerializedJob {
    /// Creates a fresh, unleased record with a new ID.
    pub fn new(
        job_type: impl Into<String>,
        queue: impl Into<String>,
        payload: serde_json::Value,
        priority: i32,
        max_retries: u32,
    ) -> Self {
        let now = now_millis();
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            payload,
            queue: queue.into(),
            priority,
            max_retries,
            attempts: 0,
            run_at: now,
            locked_at: None,
            locked_by: None,
            failed_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true while a worker holds the lease.
    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }

    /// Returns true once all retries are spent.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_retries
    }

    /// Stamps the lease fields.
    pub fn lock(&mut self, worker_id: &str, at: DateTime<Utc>) {
        self.locked_at = Some(at);
        self.locked_by = Some(worker_id.to_string());
        self.updated_at = at;
    }

    /// Clears the lease fields.
    pub fn unlock(&mut self) {
        self.locked_at = None;
        self.locked_by = None;
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> JobResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> JobResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A job retained in dead storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadJob {
    /// The job as it was when it died.
    #[serde(flatten)]
    pub job: SerializedJob,

    /// When the job was moved to dead storage.
    pub dead_at: DateTime<Utc>,
}

impl DeadJob {
    /// Wraps a job for dead storage, stamping `failed_at`, `dead_at` and the final error.
    pub fn new(mut job: SerializedJob, error: &str) -> Self {
        let now = now_millis();
        job.unlock();
        job.failed_at = Some(now);
        job.last_error = Some(error.to_string());
        job.updated_at = now;
        Self { job, dead_at: now }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> JobResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> JobResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Best-effort counters for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs eligible to run now.
    pub pending: u64,

    /// Jobs waiting for a future `run_at`.
    pub scheduled: u64,

    /// Jobs currently leased.
    pub processing: u64,

    /// Jobs in dead storage.
    pub failed: u64,

    /// Completed jobs, where the backend keeps a counter.
    pub completed: Option<u64>,
}

/// Current time truncated to millisecond precision, the resolution every backend persists.
pub fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

/// Truncates a timestamp to millisecond precision.
pub fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::milliseconds(1)).unwrap_or(at)
}
