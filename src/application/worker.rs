use super::generator::DocumentGenerator;
use super::processor::{ProcessOutcome, TransactionProcessor};
use super::renderer::DocumentRenderer;
use crate::config::BillingConfig;
use crate::domain::document::{BillingDocument, DocumentState};
use crate::domain::job::{Job, JobKind};
use crate::domain::ports::{ClockRef, JobQueueRef};
use crate::error::{BillingError, ErrorClass, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// What the worker does with a job after running it.
enum Step {
    Done(Vec<JobKind>),
    RetryAfter { delay: Duration, reason: String },
    /// Terminal failure that needs an operator.
    Surface(String),
}

/// Fixed-size pool of executors pulling from the shared job queue.
///
/// Workers hold no state of their own; all coordination goes through the
/// queue, the lock manager and the stores, so several pools may run against
/// the same backends.
pub struct WorkerPool {
    config: Arc<BillingConfig>,
    clock: ClockRef,
    queue: JobQueueRef,
    generator: Arc<DocumentGenerator>,
    processor: Arc<TransactionProcessor>,
    renderer: Arc<DocumentRenderer>,
}

impl WorkerPool {
    pub fn new(
        config: Arc<BillingConfig>,
        clock: ClockRef,
        queue: JobQueueRef,
        generator: Arc<DocumentGenerator>,
        processor: Arc<TransactionProcessor>,
        renderer: Arc<DocumentRenderer>,
    ) -> Self {
        Self {
            config,
            clock,
            queue,
            generator,
            processor,
            renderer,
        }
    }

    /// Dequeues and handles one job. Returns `false` when nothing was ready.
    pub async fn run_once(&self, worker_id: usize) -> Result<bool> {
        let Some(job) = self.queue.dequeue().await? else {
            return Ok(false);
        };
        let span = tracing::info_span!(
            "job",
            job_id = %job.id,
            job_type = job.kind.job_type(),
            worker_id,
            attempt = job.attempts + 1
        );
        let job_id = job.id;
        if let Err(e) = self.handle(job).instrument(span).await {
            // e.g. the lease expired and another worker already acked it
            tracing::warn!(job_id = %job_id, error = %e, "Failed to record job outcome");
        }
        Ok(true)
    }

    async fn handle(&self, job: Job) -> Result<()> {
        tracing::debug!(target_id = %job.kind.target_id(), "Job started");
        let now = self.clock.now();
        match self.execute(&job).await {
            Ok(Step::Done(follow_ups)) => {
                // enqueue before ack: a crash in between only replays the job
                for kind in follow_ups {
                    self.queue.enqueue(Job::new(kind, now)).await?;
                }
                self.queue.ack(job.id).await?;
                tracing::debug!("Job done");
            }
            Ok(Step::RetryAfter { delay, reason }) => {
                self.queue.retry(job.id, after(now, delay), &reason).await?;
            }
            Ok(Step::Surface(reason)) => {
                tracing::error!(reason = %reason, "Job failed, operator attention required");
                self.queue.nack(job.id, &reason).await?;
            }
            Err(e) => self.handle_error(&job, e, now).await?,
        }
        Ok(())
    }

    async fn handle_error(&self, job: &Job, error: BillingError, now: DateTime<Utc>) -> Result<()> {
        match error.class() {
            ErrorClass::Contention => {
                let delay = self.config.workers.busy_delay();
                tracing::debug!(error = %error, delay_ms = delay.as_millis() as u64, "Lock busy, rescheduling");
                self.queue.reschedule(job.id, after(now, delay)).await
            }
            ErrorClass::Transient => {
                let attempt = job.attempts + 1;
                let limit = self.max_attempts(&job.kind);
                if attempt >= limit {
                    tracing::error!(error = %error, attempts = attempt, "Job retries exhausted");
                    self.queue.nack(job.id, &error.to_string()).await
                } else {
                    let delay = self.config.workers.retry_delay(attempt);
                    tracing::warn!(error = %error, delay_secs = delay.as_secs(), "Job failed, requeued");
                    self.queue.retry(job.id, after(now, delay), &error.to_string()).await
                }
            }
            ErrorClass::Permanent | ErrorClass::Invariant => {
                tracing::error!(error = %error, class = ?error.class(), "Job failed permanently");
                self.queue.nack(job.id, &error.to_string()).await
            }
        }
    }

    fn max_attempts(&self, kind: &JobKind) -> u32 {
        match kind {
            JobKind::RenderDocument { .. } => self.config.documents.render_max_attempts,
            _ => self.config.workers.max_job_attempts,
        }
    }

    async fn execute(&self, job: &Job) -> Result<Step> {
        match &job.kind {
            JobKind::GenerateDocuments {
                subscription,
                period,
            } => {
                let generated = self.generator.generate(*subscription, *period).await?;
                match generated.document() {
                    Some(document) => self.after_generate(document.clone()).await.map(Step::Done),
                    None => Ok(Step::Done(Vec::new())),
                }
            }
            JobKind::RenderDocument { document, force } => {
                self.renderer.render(*document, *force).await?;
                Ok(Step::Done(Vec::new()))
            }
            JobKind::ProcessTransaction { transaction } => {
                match self.processor.process(*transaction).await? {
                    ProcessOutcome::Settled(_) | ProcessOutcome::Unchanged(_) => {
                        Ok(Step::Done(Vec::new()))
                    }
                    ProcessOutcome::RetryScheduled { transaction, delay } => Ok(Step::RetryAfter {
                        delay,
                        reason: transaction
                            .failure
                            .map(|f| f.reason)
                            .unwrap_or_else(|| "transient failure".to_string()),
                    }),
                    ProcessOutcome::Rejected(tx) => Ok(Step::Surface(format!(
                        "transaction {} rejected: {}",
                        tx.id,
                        tx.failure.map(|f| f.reason).unwrap_or_default()
                    ))),
                    ProcessOutcome::Exhausted(tx) => Ok(Step::Surface(format!(
                        "transaction {} failed after {} attempts",
                        tx.id, tx.attempts
                    ))),
                }
            }
            JobKind::MarkOverdue { document } => {
                self.generator.mark_overdue(*document).await?;
                Ok(Step::Done(Vec::new()))
            }
        }
    }

    /// Issues a fresh draft when configured, then fans out to rendering and
    /// payment. Safe to replay: every step checks what already happened.
    async fn after_generate(&self, mut document: BillingDocument) -> Result<Vec<JobKind>> {
        if document.state() == DocumentState::Draft {
            if !self.config.documents.auto_issue {
                return Ok(Vec::new());
            }
            document = self.generator.issue(document.id).await?;
        }
        if !document.state().is_issued() {
            return Ok(Vec::new());
        }

        let mut follow_ups = Vec::new();
        if document.artifact.is_none() {
            follow_ups.push(JobKind::RenderDocument {
                document: document.id,
                force: false,
            });
        }
        if self.config.transactions.auto_create && document.state() != DocumentState::Paid {
            let tx = self.processor.create_for_document(document.id).await?;
            if !tx.state().is_terminal() {
                follow_ups.push(JobKind::ProcessTransaction { transaction: tx.id });
            }
        }
        Ok(follow_ups)
    }

    /// Starts `workers.count` workers that run until `shutdown` fires.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.config.workers.count)
            .map(|worker_id| {
                let pool = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    tracing::info!(worker_id, "Worker started");
                    let poll = pool.config.workers.poll_interval();
                    while !shutdown.is_cancelled() {
                        let idle = match pool.run_once(worker_id).await {
                            Ok(processed) => !processed,
                            Err(e) => {
                                tracing::error!(worker_id, error = %e, "Worker iteration failed");
                                true
                            }
                        };
                        if idle {
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = tokio::time::sleep(poll) => {}
                            }
                        }
                    }
                    tracing::info!(worker_id, "Worker stopped");
                })
            })
            .collect()
    }

    /// Runs `workers.count` workers until no job is ready, returning how many
    /// jobs were handled. Jobs delayed into the future are left queued.
    pub async fn drain(self: &Arc<Self>) -> Result<usize> {
        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.workers.count {
            let pool = Arc::clone(self);
            workers.spawn(async move {
                let mut handled = 0usize;
                while pool.run_once(worker_id).await? {
                    handled += 1;
                }
                Ok::<_, BillingError>(handled)
            });
        }

        let mut total = 0;
        while let Some(joined) = workers.join_next().await {
            total += joined.map_err(|e| BillingError::InternalError(Box::new(e)))??;
        }
        tracing::debug!(jobs = total, "Worker pool drained");
        Ok(total)
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
