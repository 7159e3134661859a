//! PostgreSQL-backed adapter.
//!
//! Dequeue claims one row with `FOR UPDATE SKIP LOCKED`, so concurrent
//! workers never lease the same job. Within a queue rows are handed out by
//! `priority DESC, run_at ASC`, then creation order.

use crate::adapter::{lease_cutoff, retried, JobAdapter};
use crate::config::SqlConfig;
use crate::error::{JobError, JobResult};
use crate::job::JobId;
use crate::serialized::{now_millis, truncate_millis, DeadJob, QueueStats, SerializedJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, job_type, payload, queue, priority, max_retries, attempts, run_at, \
     locked_at, locked_by, failed_at, last_error, created_at, updated_at";

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    payload: serde_json::Value,
    queue: String,
    priority: i32,
    max_retries: i32,
    attempts: i32,
    run_at: DateTime<Utc>,
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    failed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for SerializedJob {
    type Error = JobError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let non_negative = |column: &str, value: i32| {
            u32::try_from(value)
                .map_err(|_| JobError::Backend(format!("negative {column} for job {id}")))
        };
        Ok(SerializedJob {
            id: JobId::from_uuid(id),
            max_retries: non_negative("max_retries", row.max_retries)?,
            attempts: non_negative("attempts", row.attempts)?,
            job_type: row.job_type,
            payload: row.payload,
            queue: row.queue,
            priority: row.priority,
            run_at: row.run_at,
            locked_at: row.locked_at,
            locked_by: row.locked_by,
            failed_at: row.failed_at,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct DeadRow {
    #[sqlx(flatten)]
    job: JobRow,
    dead_at: DateTime<Utc>,
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// SQL job adapter over a PostgreSQL pool.
#[derive(Clone)]
pub struct SqlAdapter {
    pool: PgPool,
}

impl SqlAdapter {
    /// Wraps an existing pool. Migrations are not run.
    #[must_use]
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects using the given configuration, running migrations when enabled.
    pub async fn connect(config: &SqlConfig) -> JobResult<Self> {
        info!(max_connections = config.max_connections, "Connecting to PostgreSQL job store...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.dsn)
            .await
            .map_err(|e| {
                warn!("Failed to connect to job store: {}", e);
                JobError::Database(e)
            })?;

        let adapter = Self { pool };
        if config.run_migrations {
            adapter.run_migrations().await?;
        }

        info!("PostgreSQL job store connection established");
        Ok(adapter)
    }

    /// Applies the bundled schema migrations.
    pub async fn run_migrations(&self) -> JobResult<()> {
        info!("Running job store migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Job store migrations completed");
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobAdapter for SqlAdapter {
    fn name(&self) -> &'static str {
        "sql"
    }

    async fn enqueue_at(&self, job: SerializedJob, run_at: DateTime<Utc>) -> JobResult<JobId> {
        let run_at = truncate_millis(run_at);
        let now = now_millis();

        sqlx::query(
            "INSERT INTO jobs (id, job_type, payload, queue, priority, max_retries, attempts, run_at, \
             locked_at, locked_by, failed_at, last_error, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL, NULL, NULL, $9, $10, $11)",
        )
        .bind(job.id.as_uuid())
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(&job.queue)
        .bind(job.priority)
        .bind(to_i32(job.max_retries))
        .bind(to_i32(job.attempts))
        .bind(run_at)
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(
            job_id = %job.id,
            queue = %job.queue,
            priority = job.priority,
            run_at = %run_at,
            "Enqueued job"
        );
        Ok(job.id)
    }

    async fn dequeue(&self, queue: &str, worker_id: &str) -> JobResult<Option<SerializedJob>> {
        let now = now_millis();
        let sql = format!(
            "UPDATE jobs SET locked_at = $2, locked_by = $3, updated_at = $2 \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE queue = $1 AND run_at <= $2 AND locked_at IS NULL AND failed_at IS NULL \
                 ORDER BY priority DESC, run_at ASC, created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {JOB_COLUMNS}"
        );

        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(queue)
            .bind(now)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let job = SerializedJob::try_from(row)?;
        debug!(job_id = %job.id, queue = %queue, worker_id = %worker_id, "Dequeued job");
        Ok(Some(job))
    }

    async fn complete(&self, job: &SerializedJob) -> JobResult<()> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE id = $1 AND attempts = $2 AND locked_at IS NOT NULL",
        )
        .bind(job.id.as_uuid())
        .bind(to_i32(job.attempts))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            debug!(job_id = %job.id, attempts = job.attempts, "Complete ignored, lease does not match");
        }
        Ok(())
    }

    async fn retry(&self, job: &SerializedJob, delay: Duration, error: &str) -> JobResult<()> {
        let next = retried(job, delay, error);
        let result = sqlx::query(
            "UPDATE jobs SET attempts = $3, run_at = $4, last_error = $5, \
             locked_at = NULL, locked_by = NULL, updated_at = $6 \
             WHERE id = $1 AND attempts = $2 AND locked_at IS NOT NULL",
        )
        .bind(job.id.as_uuid())
        .bind(to_i32(job.attempts))
        .bind(to_i32(next.attempts))
        .bind(next.run_at)
        .bind(&next.last_error)
        .bind(next.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(job_id = %job.id, attempts = job.attempts, "Retry ignored, lease does not match");
        }
        Ok(())
    }

    async fn release(&self, job: &SerializedJob) -> JobResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET locked_at = NULL, locked_by = NULL, updated_at = $3 \
             WHERE id = $1 AND attempts = $2 AND locked_at IS NOT NULL",
        )
        .bind(job.id.as_uuid())
        .bind(to_i32(job.attempts))
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(job_id = %job.id, "Release ignored, lease does not match");
        }
        Ok(())
    }

    async fn dead(&self, job: &SerializedJob, error: &str) -> JobResult<()> {
        let dead = DeadJob::new(job.clone(), error);
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM jobs WHERE id = $1 AND locked_at IS NOT NULL")
            .bind(job.id.as_uuid())
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(job_id = %job.id, "Dead-letter ignored, job not leased");
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO dead_jobs (id, job_type, payload, queue, priority, max_retries, attempts, \
             run_at, failed_at, last_error, created_at, updated_at, dead_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(dead.job.id.as_uuid())
        .bind(&dead.job.job_type)
        .bind(&dead.job.payload)
        .bind(&dead.job.queue)
        .bind(dead.job.priority)
        .bind(to_i32(dead.job.max_retries))
        .bind(to_i32(dead.job.attempts))
        .bind(dead.job.run_at)
        .bind(dead.job.failed_at.unwrap_or(dead.dead_at))
        .bind(&dead.job.last_error)
        .bind(dead.job.created_at)
        .bind(dead.job.updated_at)
        .bind(dead.dead_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn stats(&self) -> JobResult<HashMap<String, QueueStats>> {
        let now = now_millis();
        let live: Vec<(String, i64, i64, i64)> = sqlx::query_as(
            "SELECT queue, \
                 COUNT(*) FILTER (WHERE locked_at IS NULL AND run_at <= $1), \
                 COUNT(*) FILTER (WHERE locked_at IS NULL AND run_at > $1), \
                 COUNT(*) FILTER (WHERE locked_at IS NOT NULL) \
             FROM jobs GROUP BY queue",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let dead: Vec<(String, i64)> =
            sqlx::query_as("SELECT queue, COUNT(*) FROM dead_jobs GROUP BY queue")
                .fetch_all(&self.pool)
                .await?;

        let mut stats: HashMap<String, QueueStats> = HashMap::new();
        for (queue, pending, scheduled, processing) in live {
            let entry = stats.entry(queue).or_default();
            entry.pending = to_u64(pending);
            entry.scheduled = to_u64(scheduled);
            entry.processing = to_u64(processing);
        }
        for (queue, failed) in dead {
            stats.entry(queue).or_default().failed = to_u64(failed);
        }
        Ok(stats)
    }

    async fn clear(&self, queue: Option<&str>) -> JobResult<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE locked_at IS NULL AND ($1::TEXT IS NULL OR queue = $1)",
        )
        .bind(queue)
        .execute(&self.pool)
        .await?;

        let removed = result.rows_affected();
        info!(queue = queue.unwrap_or("*"), removed, "Cleared queued jobs");
        Ok(removed)
    }

    async fn expired_leases(&self, ttl: Duration) -> JobResult<Vec<SerializedJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE locked_at IS NOT NULL AND locked_at < $1 \
             ORDER BY locked_at ASC"
        );
        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(lease_cutoff(ttl))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SerializedJob::try_from).collect()
    }

    async fn dead_jobs(&self, queue: Option<&str>, limit: usize) -> JobResult<Vec<DeadJob>> {
        let rows: Vec<DeadRow> = sqlx::query_as(
            "SELECT id, job_type, payload, queue, priority, max_retries, attempts, run_at, \
                 NULL::TIMESTAMPTZ AS locked_at, NULL::TEXT AS locked_by, failed_at, last_error, \
                 created_at, updated_at, dead_at \
             FROM dead_jobs \
             WHERE ($1::TEXT IS NULL OR queue = $1) \
             ORDER BY dead_at DESC \
             LIMIT $2",
        )
        .bind(queue)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(DeadJob {
                    dead_at: row.dead_at,
                    job: SerializedJob::try_from(row.job)?,
                })
            })
            .collect()
    }

    async fn ping(&self) -> JobResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> JobResult<()> {
        info!("Closing job store connection pool...");
        self.pool.close().await;
        info!("Job store connection pool closed");
        Ok(())
    }
}
