use crate::config::QueueConfig;
use crate::domain::job::{Job, JobId, JobStatus};
use crate::domain::ports::{ClockRef, EnqueueOutcome, JobQueue};
use crate::error::{BillingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

struct Entry {
    job: Job,
    seq: u64,
    visible_at: DateTime<Utc>,
    leased_until: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.job.status {
            JobStatus::Pending => self.visible_at <= now,
            // lease ran out: the worker holding it is presumed dead
            JobStatus::Running => self.leased_until.is_some_and(|until| until <= now),
            JobStatus::Done | JobStatus::Failed => false,
        }
    }
}

#[derive(Default)]
struct QueueState {
    seq: u64,
    jobs: HashMap<JobId, Entry>,
    dedup: HashMap<String, (JobId, DateTime<Utc>)>,
    failed: Vec<Job>,
}

impl QueueState {
    fn release_dedup(&mut self, job: &Job) {
        let key = job.dedup_key();
        if self.dedup.get(&key).is_some_and(|(id, _)| *id == job.id) {
            self.dedup.remove(&key);
        }
    }
}

/// In-process job queue with a task-once style dedup layer.
///
/// A dedup key is held while its job is pending or running and expires after
/// `dedup_timeout` even if the job never finishes. The dedup layer only drops
/// redundant descriptors; it does not make processing exactly-once.
#[derive(Clone)]
pub struct InMemoryJobQueue {
    clock: ClockRef,
    dedup_timeout: Duration,
    visibility_timeout: Duration,
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryJobQueue {
    pub fn new(clock: ClockRef, config: &QueueConfig) -> Self {
        Self {
            clock,
            dedup_timeout: Duration::seconds(config.dedup_timeout_secs as i64),
            visibility_timeout: Duration::seconds(config.visibility_timeout_secs as i64),
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    /// Jobs not yet acked or failed, in delivery order.
    pub async fn outstanding(&self) -> Vec<Job> {
        let state = self.state.lock().await;
        let mut entries: Vec<_> = state.jobs.values().collect();
        entries.sort_by_key(|e| (e.visible_at, e.seq));
        entries.into_iter().map(|e| e.job.clone()).collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.jobs.is_empty()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<EnqueueOutcome> {
        let now = self.clock.now();
        let key = job.dedup_key();
        let mut state = self.state.lock().await;

        if let Some((existing, expires_at)) = state.dedup.get(&key).copied()
            && expires_at > now
            && state.jobs.contains_key(&existing)
        {
            tracing::debug!(dedup_key = %key, job_id = %existing, "Dropping duplicate job");
            return Ok(EnqueueOutcome::Duplicate(existing));
        }

        state.seq += 1;
        let seq = state.seq;
        let id = job.id;
        state.dedup.insert(key, (id, now + self.dedup_timeout));
        state.jobs.insert(
            id,
            Entry {
                visible_at: job.scheduled_at,
                job,
                seq,
                leased_until: None,
            },
        );
        Ok(EnqueueOutcome::Enqueued(id))
    }

    async fn dequeue(&self) -> Result<Option<Job>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let next = state
            .jobs
            .values()
            .filter(|e| e.is_ready(now))
            .min_by_key(|e| (e.visible_at, e.seq))
            .map(|e| e.job.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let visibility_timeout = self.visibility_timeout;
        let entry = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| BillingError::not_found("job", id))?;
        if entry.job.status == JobStatus::Running {
            tracing::warn!(job_id = %id, "Lease expired, redelivering job");
        }
        entry.job.status = JobStatus::Running;
        entry.leased_until = Some(now + visibility_timeout);
        Ok(Some(entry.job.clone()))
    }

    async fn ack(&self, job_id: JobId) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut entry = state
            .jobs
            .remove(&job_id)
            .ok_or_else(|| BillingError::not_found("job", job_id))?;
        entry.job.status = JobStatus::Done;
        state.release_dedup(&entry.job);
        Ok(())
    }

    async fn nack(&self, job_id: JobId, reason: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut entry = state
            .jobs
            .remove(&job_id)
            .ok_or_else(|| BillingError::not_found("job", job_id))?;
        entry.job.status = JobStatus::Failed;
        entry.job.last_error = Some(reason.to_string());
        state.release_dedup(&entry.job);
        // one record per dedup key: a repeated failure replaces the older one
        let key = entry.job.dedup_key();
        state.failed.retain(|job| job.dedup_key() != key);
        state.failed.push(entry.job);
        Ok(())
    }

    async fn retry(&self, job_id: JobId, at: DateTime<Utc>, reason: &str) -> Result<()> {
        let dedup_until = self.clock.now().max(at) + self.dedup_timeout;
        let mut state = self.state.lock().await;
        let entry = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| BillingError::not_found("job", job_id))?;
        entry.job.attempts += 1;
        entry.job.status = JobStatus::Pending;
        entry.job.last_error = Some(reason.to_string());
        entry.visible_at = at;
        entry.leased_until = None;
        let key = entry.job.dedup_key();
        state.dedup.insert(key, (job_id, dedup_until));
        Ok(())
    }

    async fn reschedule(&self, job_id: JobId, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let entry = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| BillingError::not_found("job", job_id))?;
        entry.job.status = JobStatus::Pending;
        entry.visible_at = at;
        entry.leased_until = None;
        Ok(())
    }

    async fn failed_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.state.lock().await.failed.clone())
    }
}
