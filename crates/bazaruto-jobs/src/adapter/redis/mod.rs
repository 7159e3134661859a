//! Redis-backed adapter.
//!
//! Layout under `<prefix>`:
//!
//! | Key | Type | Contents |
//! |-----|------|----------|
//! | `queue:<queue>` | sorted set | job ids scored by [`score`] |
//! | `data:<id>` | string | `SerializedJob` JSON |
//! | `processing` | hash | id → lease JSON (`queue`, `locked_at_ms`, `locked_by`, `attempts`) |
//! | `dead` | hash | id → `DeadJob` JSON |
//! | `queues` | set | every queue name ever used |
//! | `stats:<queue>` | hash | `completed` and `dead` counters |

mod queue;
mod scripts;

pub use queue::RedisAdapter;

use crate::config::RedisConfig;
use crate::error::{JobError, JobResult};
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;

/// Create a Redis connection pool.
pub async fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    info!(addr = %config.addr, db = config.db, "Creating Redis connection pool for job queue...");

    let cfg = Config::from_url(config.url()?);

    let pool = cfg
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {e}")))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {e}")))?;

    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Sorted-set score: `run_at` in milliseconds, then priority (higher first) in the low three digits.
pub fn score(run_at: DateTime<Utc>, priority: i32) -> i64 {
    run_at.timestamp_millis() * 1000 + i64::from(499 - priority.clamp(-499, 499))
}

/// Highest score that is due at `now`.
pub fn due_score(now: DateTime<Utc>) -> i64 {
    now.timestamp_millis() * 1000 + 999
}

/// Redis key builder for the job adapter.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Sorted set of queued job ids.
    pub fn queue(&self, queue_name: &str) -> String {
        format!("{}:queue:{}", self.prefix, queue_name)
    }

    /// Job data key.
    pub fn data(&self, job_id: &str) -> String {
        format!("{}{}", self.data_prefix(), job_id)
    }

    /// Prefix of job data keys, used by scripts that derive keys from ids.
    pub fn data_prefix(&self) -> String {
        format!("{}:data:", self.prefix)
    }

    /// Lease hash.
    pub fn processing(&self) -> String {
        format!("{}:processing", self.prefix)
    }

    /// Dead-letter hash.
    pub fn dead(&self) -> String {
        format!("{}:dead", self.prefix)
    }

    /// Set of known queue names.
    pub fn queues(&self) -> String {
        format!("{}:queues", self.prefix)
    }

    /// Per-queue counters.
    pub fn stats(&self, queue_name: &str) -> String {
        format!("{}{}", self.stats_prefix(), queue_name)
    }

    /// Prefix of counter keys, used by scripts that derive keys from leases.
    pub fn stats_prefix(&self) -> String {
        format!("{}:stats:", self.prefix)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("bazaruto:jobs")
    }
}
