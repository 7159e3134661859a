//! In-process adapter backed by per-queue min-heaps.
//!
//! State lives behind a single mutex and is lost on restart. Suited to tests
//! and single-process deployments.

use super::{lease_cutoff, retried, JobAdapter};
use crate::error::JobResult;
use crate::job::JobId;
use crate::serialized::{now_millis, truncate_millis, DeadJob, QueueStats, SerializedJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;
use tracing::debug;

/// Heap entry ordered so that the max-heap pops `(run_at ASC, priority DESC, seq ASC)` first.
#[derive(Debug)]
struct Entry {
    seq: u64,
    job: SerializedJob,
}

impl Entry {
    fn key(&self) -> (DateTime<Utc>, i32, u64) {
        (self.job.run_at, self.job.priority, self.seq)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        let (run_at, priority, seq) = self.key();
        let (other_run_at, other_priority, other_seq) = other.key();
        other_run_at
            .cmp(&run_at)
            .then(priority.cmp(&other_priority))
            .then(other_seq.cmp(&seq))
    }
}

#[derive(Default)]
struct State {
    queues: HashMap<String, BinaryHeap<Entry>>,
    leased: HashMap<JobId, SerializedJob>,
    dead: Vec<DeadJob>,
    completed: HashMap<String, u64>,
    seq: u64,
}

impl State {
    fn push(&mut self, job: SerializedJob) {
        self.seq += 1;
        let seq = self.seq;
        self.queues
            .entry(job.queue.clone())
            .or_default()
            .push(Entry { seq, job });
    }

    /// Removes the lease if it still matches the caller's view of the job.
    fn take_lease(&mut self, job: &SerializedJob) -> Option<SerializedJob> {
        let current = self
            .leased
            .get(&job.id)
            .is_some_and(|leased| leased.attempts == job.attempts);
        if current {
            self.leased.remove(&job.id)
        } else {
            None
        }
    }
}

/// In-memory job adapter.
#[derive(Default)]
pub struct MemoryAdapter {
    state: Mutex<State>,
}

impl MemoryAdapter {
    /// Creates an empty adapter.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobAdapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn enqueue_at(&self, mut job: SerializedJob, run_at: DateTime<Utc>) -> JobResult<JobId> {
        job.run_at = truncate_millis(run_at);
        job.unlock();
        job.updated_at = now_millis();
        let id = job.id;
        debug!(job_id = %id, queue = %job.queue, run_at = %job.run_at, "Enqueued job in memory");
        self.state.lock().push(job);
        Ok(id)
    }

    async fn dequeue(&self, queue: &str, worker_id: &str) -> JobResult<Option<SerializedJob>> {
        let now = now_millis();
        let mut state = self.state.lock();
        let Some(heap) = state.queues.get_mut(queue) else {
            return Ok(None);
        };
        match heap.peek() {
            Some(entry) if entry.job.run_at <= now => {}
            _ => return Ok(None),
        }
        let Some(Entry { mut job, .. }) = heap.pop() else {
            return Ok(None);
        };
        job.lock(worker_id, now);
        state.leased.insert(job.id, job.clone());
        Ok(Some(job))
    }

    async fn complete(&self, job: &SerializedJob) -> JobResult<()> {
        let mut state = self.state.lock();
        match state.take_lease(job) {
            Some(current) => *state.completed.entry(current.queue).or_default() += 1,
            None => {
                debug!(job_id = %job.id, attempts = job.attempts, "Ignoring completion for job not leased at this attempt");
            }
        }
        Ok(())
    }

    async fn retry(&self, job: &SerializedJob, delay: Duration, error: &str) -> JobResult<()> {
        let mut state = self.state.lock();
        let Some(current) = state.take_lease(job) else {
            debug!(job_id = %job.id, attempts = job.attempts, "Ignoring retry for job not leased at this attempt");
            return Ok(());
        };
        let next = retried(&current, delay, error);
        state.push(next);
        Ok(())
    }

    async fn release(&self, job: &SerializedJob) -> JobResult<()> {
        let mut state = self.state.lock();
        if let Some(mut current) = state.take_lease(job) {
            current.unlock();
            current.updated_at = now_millis();
            state.push(current);
        }
        Ok(())
    }

    async fn dead(&self, job: &SerializedJob, error: &str) -> JobResult<()> {
        let mut state = self.state.lock();
        if state.leased.remove(&job.id).is_none() {
            debug!(job_id = %job.id, "Ignoring dead-letter for job that is not leased");
            return Ok(());
        }
        state.dead.push(DeadJob::new(job.clone(), error));
        Ok(())
    }

    async fn stats(&self) -> JobResult<HashMap<String, QueueStats>> {
        let now = now_millis();
        let state = self.state.lock();
        let mut stats: HashMap<String, QueueStats> = HashMap::new();

        for (queue, heap) in &state.queues {
            let entry = stats.entry(queue.clone()).or_default();
            for item in heap {
                if item.job.run_at <= now {
                    entry.pending += 1;
                } else {
                    entry.scheduled += 1;
                }
            }
        }
        for job in state.leased.values() {
            stats.entry(job.queue.clone()).or_default().processing += 1;
        }
        for dead in &state.dead {
            stats.entry(dead.job.queue.clone()).or_default().failed += 1;
        }
        for (queue, completed) in &state.completed {
            stats.entry(queue.clone()).or_default().completed = Some(*completed);
        }
        for entry in stats.values_mut() {
            entry.completed.get_or_insert(0);
        }
        Ok(stats)
    }

    async fn clear(&self, queue: Option<&str>) -> JobResult<u64> {
        let mut state = self.state.lock();
        let removed = match queue {
            Some(queue) => state.queues.remove(queue).map_or(0, |heap| heap.len()),
            None => state.queues.drain().map(|(_, heap)| heap.len()).sum(),
        };
        Ok(removed as u64)
    }

    async fn expired_leases(&self, ttl: Duration) -> JobResult<Vec<SerializedJob>> {
        let cutoff = lease_cutoff(ttl);
        let state = self.state.lock();
        Ok(state
            .leased
            .values()
            .filter(|job| job.locked_at.is_some_and(|at| at < cutoff))
            .cloned()
            .collect())
    }

    async fn dead_jobs(&self, queue: Option<&str>, limit: usize) -> JobResult<Vec<DeadJob>> {
        let state = self.state.lock();
        Ok(state
            .dead
            .iter()
            .rev()
            .filter(|dead| queue.map_or(true, |q| dead.job.queue == q))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> JobResult<()> {
        Ok(())
    }

    async fn close(&self) -> JobResult<()> {
        Ok(())
    }
}
