//! Job engine configuration.

use crate::backoff::BackoffPolicy;
use crate::error::{JobError, JobResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Configuration for the job engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Storage backend.
    #[serde(default)]
    pub adapter: AdapterConfig,

    /// Worker pool configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Retry backoff configuration.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Stale lease recovery.
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Cron scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl JobsConfig {
    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> JobResult<()> {
        if self.worker.concurrency == 0 {
            return Err(JobError::Configuration(
                "worker.concurrency must be at least 1".to_string(),
            ));
        }
        if self.worker.queues.is_empty() || self.worker.queues.iter().any(String::is_empty) {
            return Err(JobError::Configuration(
                "worker.queues must list at least one non-empty queue".to_string(),
            ));
        }
        match &self.adapter {
            AdapterConfig::Memory => {}
            AdapterConfig::Redis(redis) if redis.addr.trim().is_empty() => {
                return Err(JobError::Configuration("redis addr is required".to_string()));
            }
            AdapterConfig::Sql(sql) if sql.dsn.trim().is_empty() => {
                return Err(JobError::Configuration("sql dsn is required".to_string()));
            }
            AdapterConfig::Redis(redis) => {
                redis.url()?;
            }
            AdapterConfig::Sql(_) => {}
        }
        if self.lease.enabled && self.lease.ttl() <= self.worker.default_timeout() {
            return Err(JobError::Configuration(format!(
                "lease.ttl_secs ({}) must exceed worker.default_timeout_secs ({})",
                self.lease.ttl_secs, self.worker.default_timeout_secs
            )));
        }
        if self.lease.enabled && self.lease.reap_interval_secs == 0 {
            return Err(JobError::Configuration(
                "lease.reap_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.scheduler.enabled && self.scheduler.tick_interval_ms == 0 {
            return Err(JobError::Configuration(
                "scheduler.tick_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum AdapterConfig {
    /// In-process priority heap.
    #[default]
    Memory,
    /// Redis sorted sets driven by server-side scripts.
    Redis(RedisConfig),
    /// PostgreSQL with row-level skip-locked dequeue.
    Sql(SqlConfig),
}

impl AdapterConfig {
    /// Backend name used in logs.
    pub fn driver(&self) -> &'static str {
        match self {
            AdapterConfig::Memory => "memory",
            AdapterConfig::Redis(_) => "redis",
            AdapterConfig::Sql(_) => "sql",
        }
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Server address, either `host:port` or a `redis://` URL without a database path.
    #[serde(default = "default_redis_addr")]
    pub addr: String,

    /// Optional password.
    #[serde(default)]
    pub password: Option<String>,

    /// Logical database.
    #[serde(default)]
    pub db: i64,

    /// Key prefix for all job-related keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: default_redis_addr(),
            password: None,
            db: 0,
            key_prefix: default_key_prefix(),
            pool_size: default_pool_size(),
        }
    }
}

impl RedisConfig {
    /// Builds the connection URL from address, password and database.
    ///
    /// The password is percent-encoded. Credentials already present in
    /// `addr` take precedence.
    pub fn url(&self) -> JobResult<String> {
        let addr = self.addr.trim().trim_end_matches('/');
        let base = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("redis://{addr}")
        };
        let mut url = Url::parse(&base)
            .map_err(|e| JobError::Configuration(format!("Invalid redis addr: {e}")))?;

        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            if url.username().is_empty() && url.password().is_none() {
                url.set_password(Some(password)).map_err(|()| {
                    JobError::Configuration("redis addr cannot carry a password".to_string())
                })?;
            }
        }
        url.set_path(&self.db.to_string());
        Ok(url.into())
    }
}

fn default_redis_addr() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "bazaruto:jobs".to_string()
}

fn default_pool_size() -> usize {
    10
}

/// SQL connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlConfig {
    /// PostgreSQL connection string.
    pub dsn: String,

    /// Maximum pool connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Apply embedded migrations on connect.
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Queues to poll, first queue examined first.
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,

    /// Number of concurrent workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Sleep between empty polls in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Retry budget for job types that do not set one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Deadline for job types that do not set one, in seconds.
    #[serde(default = "default_timeout")]
    pub default_timeout_secs: u64,

    /// Bound on a single dequeue call in milliseconds.
    #[serde(default = "default_dequeue_timeout")]
    pub dequeue_timeout_ms: u64,

    /// Time granted to in-flight attempts on stop, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// In-handler retries within a single lease (0 disables).
    #[serde(default)]
    pub inner_retries: u32,

    /// Base delay of the in-handler retry loop in milliseconds.
    #[serde(default = "default_inner_backoff")]
    pub inner_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queues: default_queues(),
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            default_max_retries: default_max_retries(),
            default_timeout_secs: default_timeout(),
            dequeue_timeout_ms: default_dequeue_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            inner_retries: 0,
            inner_backoff_ms: default_inner_backoff(),
        }
    }
}

impl WorkerConfig {
    /// Poll interval as a Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Default job timeout as a Duration.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Dequeue bound as a Duration.
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    /// Shutdown grace as a Duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// In-handler retry base as a Duration.
    pub fn inner_backoff(&self) -> Duration {
        Duration::from_millis(self.inner_backoff_ms)
    }
}

fn default_queues() -> Vec<String> {
    vec!["critical".to_string(), "default".to_string(), "low".to_string()]
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout() -> u64 {
    300 // 5 minutes
}

fn default_dequeue_timeout() -> u64 {
    5000
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_inner_backoff() -> u64 {
    100
}

/// Retry backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Default base delay in milliseconds.
    #[serde(default = "default_backoff_base")]
    pub base_ms: u64,

    /// Upper bound for a single delay in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    /// Jitter factor (0.0 to 1.0).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base(),
            max_delay_secs: default_max_delay(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl BackoffConfig {
    /// Converts to a backoff policy.
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::quadratic(Duration::from_millis(self.base_ms))
            .with_max_delay(Duration::from_secs(self.max_delay_secs))
            .with_jitter(self.jitter_factor)
    }
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    86400 // 24 hours
}

fn default_jitter_factor() -> f64 {
    0.1
}

/// Stale lease recovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Run the lease reaper.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Age after which a lease is considered abandoned, in seconds.
    #[serde(default = "default_lease_ttl")]
    pub ttl_secs: u64,

    /// Reaper period in seconds.
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_lease_ttl(),
            reap_interval_secs: default_reap_interval(),
        }
    }
}

impl LeaseConfig {
    /// Lease TTL as a Duration.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Reaper period as a Duration.
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    /// Longest deadline an attempt may run under before its lease could be reaped.
    ///
    /// One second short of the TTL leaves the worker time to settle the
    /// outcome. `None` when the reaper is off.
    pub fn attempt_limit(&self) -> Option<Duration> {
        self.enabled
            .then(|| self.ttl().saturating_sub(Duration::from_secs(1)))
    }
}

fn default_lease_ttl() -> u64 {
    900 // 15 minutes
}

fn default_reap_interval() -> u64 {
    60
}

/// Cron scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether this instance fires cron schedules.
    #[serde(default)]
    pub enabled: bool,

    /// Tick interval in milliseconds.
    #[serde(default = "default_scheduler_tick")]
    pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tick_interval_ms: default_scheduler_tick(),
        }
    }
}

impl SchedulerConfig {
    /// Tick interval as a Duration.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

fn default_scheduler_tick() -> u64 {
    1000
}
