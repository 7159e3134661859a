//! Redis job adapter implementation.

use super::scripts::Scripts;
use super::{create_pool, due_score, score, RedisKeys};
use crate::adapter::{lease_cutoff, retried, JobAdapter};
use crate::config::RedisConfig;
use crate::error::{JobError, JobResult};
use crate::job::JobId;
use crate::serialized::{now_millis, truncate_millis, DeadJob, QueueStats, SerializedJob};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lease metadata written by the dequeue script.
#[derive(Debug, Deserialize)]
struct Lease {
    queue: String,
    locked_at_ms: String,
    locked_by: String,
    attempts: u32,
}

impl Lease {
    fn locked_at(&self) -> Option<DateTime<Utc>> {
        let ms = self.locked_at_ms.parse::<i64>().ok()?;
        Utc.timestamp_millis_opt(ms).single()
    }
}

/// Redis-backed job adapter.
pub struct RedisAdapter {
    pool: Pool,
    keys: RedisKeys,
    scripts: Scripts,
}

impl RedisAdapter {
    /// Create an adapter over an existing pool.
    pub fn new(pool: Pool, key_prefix: &str) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(key_prefix),
            scripts: Scripts::new(),
        }
    }

    /// Connects using the given configuration.
    pub async fn connect(config: &RedisConfig) -> JobResult<Self> {
        let pool = create_pool(config).await?;
        Ok(Self::new(pool, &config.key_prefix))
    }

    /// Key builder in use.
    pub fn keys(&self) -> &RedisKeys {
        &self.keys
    }

    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    async fn requeue(&self, job: &SerializedJob, next: &SerializedJob) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let id = job.id.to_string();
        let applied: i64 = self
            .scripts
            .requeue
            .key(self.keys.processing())
            .key(self.keys.data(&id))
            .key(self.keys.queue(&job.queue))
            .arg(&id)
            .arg(job.attempts)
            .arg(next.to_json()?)
            .arg(score(next.run_at, next.priority))
            .invoke_async(&mut *conn)
            .await?;
        Ok(applied == 1)
    }

    async fn known_queues(&self, queue: Option<&str>) -> JobResult<Vec<String>> {
        match queue {
            Some(queue) => Ok(vec![queue.to_string()]),
            None => {
                let mut conn = self.conn().await?;
                let mut queues: Vec<String> = conn.smembers(self.keys.queues()).await?;
                queues.sort();
                Ok(queues)
            }
        }
    }

    async fn leases(&self) -> JobResult<HashMap<String, Lease>> {
        let mut conn = self.conn().await?;
        let raw: HashMap<String, String> = conn.hgetall(self.keys.processing()).await?;
        let mut leases = HashMap::with_capacity(raw.len());
        for (id, json) in raw {
            match serde_json::from_str::<Lease>(&json) {
                Ok(lease) => {
                    leases.insert(id, lease);
                }
                Err(e) => warn!(job_id = %id, error = %e, "Skipping malformed lease"),
            }
        }
        Ok(leases)
    }
}

#[async_trait]
impl JobAdapter for RedisAdapter {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn enqueue_at(&self, mut job: SerializedJob, run_at: DateTime<Utc>) -> JobResult<JobId> {
        job.run_at = truncate_millis(run_at);
        job.unlock();
        job.updated_at = now_millis();
        let id = job.id.to_string();
        let json = job.to_json()?;

        let mut conn = self.conn().await?;
        let () = redis::pipe()
            .atomic()
            .set(self.keys.data(&id), &json)
            .ignore()
            .zadd(self.keys.queue(&job.queue), &id, score(job.run_at, job.priority))
            .ignore()
            .sadd(self.keys.queues(), &job.queue)
            .ignore()
            .query_async(&mut *conn)
            .await?;

        debug!(
            job_id = %id,
            queue = %job.queue,
            priority = job.priority,
            run_at = %job.run_at,
            "Enqueued job"
        );

        Ok(job.id)
    }

    async fn dequeue(&self, queue: &str, worker_id: &str) -> JobResult<Option<SerializedJob>> {
        let now = now_millis();
        let mut conn = self.conn().await?;

        let data: Option<String> = self
            .scripts
            .dequeue
            .key(self.keys.queue(queue))
            .key(self.keys.processing())
            .arg(due_score(now))
            .arg(self.keys.data_prefix())
            .arg(queue)
            .arg(now.timestamp_millis().to_string())
            .arg(worker_id)
            .invoke_async(&mut *conn)
            .await?;

        let Some(data) = data else {
            return Ok(None);
        };
        let mut job = SerializedJob::from_json(&data)?;
        job.lock(worker_id, now);

        debug!(job_id = %job.id, queue = %queue, worker_id = %worker_id, "Dequeued job");
        Ok(Some(job))
    }

    async fn complete(&self, job: &SerializedJob) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let applied: i64 = self
            .scripts
            .complete
            .key(self.keys.processing())
            .arg(job.id.to_string())
            .arg(self.keys.data_prefix())
            .arg(self.keys.stats_prefix())
            .arg(job.attempts)
            .invoke_async(&mut *conn)
            .await?;
        if applied == 0 {
            debug!(job_id = %job.id, attempts = job.attempts, "Complete ignored, lease does not match");
        }
        Ok(())
    }

    async fn retry(&self, job: &SerializedJob, delay: Duration, error: &str) -> JobResult<()> {
        let next = retried(job, delay, error);
        if !self.requeue(job, &next).await? {
            debug!(job_id = %job.id, attempts = job.attempts, "Retry ignored, lease does not match");
        }
        Ok(())
    }

    async fn release(&self, job: &SerializedJob) -> JobResult<()> {
        let mut next = job.clone();
        next.unlock();
        next.updated_at = now_millis();
        if !self.requeue(job, &next).await? {
            debug!(job_id = %job.id, "Release ignored, lease does not match");
        }
        Ok(())
    }

    async fn dead(&self, job: &SerializedJob, error: &str) -> JobResult<()> {
        let id = job.id.to_string();
        let dead = DeadJob::new(job.clone(), error);

        let mut conn = self.conn().await?;
        let applied: i64 = self
            .scripts
            .bury
            .key(self.keys.processing())
            .key(self.keys.data(&id))
            .key(self.keys.dead())
            .key(self.keys.stats(&job.queue))
            .arg(&id)
            .arg(dead.to_json()?)
            .invoke_async(&mut *conn)
            .await?;
        if applied == 0 {
            debug!(job_id = %id, "Dead-letter ignored, job not leased");
        }
        Ok(())
    }

    async fn stats(&self) -> JobResult<HashMap<String, QueueStats>> {
        let queues = self.known_queues(None).await?;
        let due = due_score(now_millis());
        let mut stats: HashMap<String, QueueStats> = HashMap::new();

        {
            let mut conn = self.conn().await?;
            for queue in &queues {
                let key = self.keys.queue(queue);
                let (pending, scheduled, counters): (u64, u64, HashMap<String, u64>) = redis::pipe()
                    .zcount(&key, "-inf", due)
                    .zcount(&key, format!("({due}"), "+inf")
                    .hgetall(self.keys.stats(queue))
                    .query_async(&mut *conn)
                    .await?;

                stats.insert(
                    queue.clone(),
                    QueueStats {
                        pending,
                        scheduled,
                        processing: 0,
                        failed: counters.get("dead").copied().unwrap_or(0),
                        completed: Some(counters.get("completed").copied().unwrap_or(0)),
                    },
                );
            }
        }

        for lease in self.leases().await?.into_values() {
            stats.entry(lease.queue).or_default().processing += 1;
        }
        Ok(stats)
    }

    async fn clear(&self, queue: Option<&str>) -> JobResult<u64> {
        let queues = self.known_queues(queue).await?;
        let mut conn = self.conn().await?;
        let mut removed = 0u64;

        for queue in queues {
            let cleared: u64 = self
                .scripts
                .clear
                .key(self.keys.queue(&queue))
                .arg(self.keys.data_prefix())
                .invoke_async(&mut *conn)
                .await?;
            if cleared > 0 {
                removed += cleared;
                info!(queue = %queue, removed = cleared, "Cleared queue");
            }
        }

        Ok(removed)
    }

    async fn expired_leases(&self, ttl: Duration) -> JobResult<Vec<SerializedJob>> {
        let cutoff = lease_cutoff(ttl);
        let expired: Vec<(String, Lease)> = self
            .leases()
            .await?
            .into_iter()
            .filter(|(_, lease)| lease.locked_at().is_some_and(|at| at < cutoff))
            .collect();
        if expired.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn().await?;
        let data_keys: Vec<String> = expired.iter().map(|(id, _)| self.keys.data(id)).collect();
        let blobs: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&data_keys)
            .query_async(&mut *conn)
            .await?;

        let mut jobs = Vec::with_capacity(expired.len());
        for ((id, lease), blob) in expired.into_iter().zip(blobs) {
            let Some(blob) = blob else {
                warn!(job_id = %id, "Lease without job data");
                continue;
            };
            let mut job = SerializedJob::from_json(&blob)?;
            if let Some(at) = lease.locked_at() {
                job.lock(&lease.locked_by, at);
            }
            job.attempts = lease.attempts;
            jobs.push(job);
        }
        Ok(jobs)
    }

    async fn dead_jobs(&self, queue: Option<&str>, limit: usize) -> JobResult<Vec<DeadJob>> {
        let mut conn = self.conn().await?;
        let blobs: Vec<String> = conn.hvals(self.keys.dead()).await?;

        let mut dead: Vec<DeadJob> = blobs
            .iter()
            .filter_map(|blob| match DeadJob::from_json(blob) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed dead job");
                    None
                }
            })
            .filter(|dead| queue.map_or(true, |q| dead.job.queue == q))
            .collect();
        dead.sort_by(|a, b| b.dead_at.cmp(&a.dead_at));
        dead.truncate(limit);
        Ok(dead)
    }

    async fn ping(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let reply: String = redis::cmd("PING").query_async(&mut *conn).await?;
        if reply != "PONG" {
            return Err(JobError::Backend(format!("unexpected PING reply: {reply}")));
        }
        Ok(())
    }

    async fn close(&self) -> JobResult<()> {
        info!("Closing Redis job adapter");
        self.pool.close();
        Ok(())
    }
}
