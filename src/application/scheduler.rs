use crate::config::BillingConfig;
use crate::domain::document::{DocumentId, DocumentState};
use crate::domain::job::{Job, JobKind};
use crate::domain::ports::{
    ClockRef, DocumentStoreRef, EnqueueOutcome, JobQueueRef, SubscriptionStoreRef,
    TransactionStoreRef,
};
use crate::domain::transaction::TransactionState;
use crate::error::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Jobs emitted by one tick, by kind. Duplicates were dropped by the queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub generate: usize,
    pub overdue: usize,
    pub render: usize,
    pub process: usize,
    pub duplicates: usize,
    /// Documents left without an artifact because their render job failed.
    pub surfaced: usize,
}

impl TickReport {
    pub fn enqueued(&self) -> usize {
        self.generate + self.overdue + self.render + self.process
    }
}

/// Periodic trigger that turns due work into job descriptors.
///
/// The scheduler never mutates domain state; it only reads the stores and
/// enqueues. Emitting the same descriptor twice is harmless.
pub struct Scheduler {
    config: Arc<BillingConfig>,
    clock: ClockRef,
    queue: JobQueueRef,
    subscriptions: SubscriptionStoreRef,
    documents: DocumentStoreRef,
    transactions: TransactionStoreRef,
}

impl Scheduler {
    pub fn new(
        config: Arc<BillingConfig>,
        clock: ClockRef,
        queue: JobQueueRef,
        subscriptions: SubscriptionStoreRef,
        documents: DocumentStoreRef,
        transactions: TransactionStoreRef,
    ) -> Self {
        Self {
            config,
            clock,
            queue,
            subscriptions,
            documents,
            transactions,
        }
    }

    pub async fn tick(&self) -> Result<TickReport> {
        let now = self.clock.now();
        let mut report = TickReport::default();

        let kind = self.config.documents.kind;
        let per_tick = self.config.scheduler.max_periods_per_tick;
        for subscription in self.subscriptions.get_all().await? {
            if !subscription.is_billable() {
                continue;
            }
            let billed_through = self.documents.latest_period(subscription.id, kind).await?;
            let mut emitted = 0;
            for period in subscription.completed_periods(now, billed_through) {
                if emitted >= per_tick {
                    break;
                }
                if self
                    .documents
                    .find_for_period(subscription.id, kind, period.start)
                    .await?
                    .is_some()
                {
                    continue;
                }
                emitted += 1;
                let job = JobKind::GenerateDocuments {
                    subscription: subscription.id,
                    period,
                };
                if self.emit(job, &mut report).await? {
                    report.generate += 1;
                }
            }
        }

        for document in self.documents.list_by_state(DocumentState::Issued).await? {
            if document.is_past_due(now)
                && self
                    .emit(JobKind::MarkOverdue { document: document.id }, &mut report)
                    .await?
            {
                report.overdue += 1;
            }
        }

        // a failed render waits for an operator regenerate
        let surfaced: HashSet<DocumentId> = self
            .queue
            .failed_jobs()
            .await?
            .into_iter()
            .filter_map(|job| match job.kind {
                JobKind::RenderDocument { document, .. } => Some(document),
                _ => None,
            })
            .collect();
        for state in [DocumentState::Issued, DocumentState::Paid, DocumentState::Overdue] {
            for document in self.documents.list_by_state(state).await? {
                if document.artifact.is_some() {
                    continue;
                }
                if surfaced.contains(&document.id) {
                    report.surfaced += 1;
                    continue;
                }
                let job = JobKind::RenderDocument {
                    document: document.id,
                    force: false,
                };
                if self.emit(job, &mut report).await? {
                    report.render += 1;
                }
            }
        }

        // left behind by a crashed worker or an interrupted follow-on enqueue
        for state in [TransactionState::Initial, TransactionState::Pending] {
            for tx in self.transactions.list_by_state(state).await? {
                if self
                    .emit(JobKind::ProcessTransaction { transaction: tx.id }, &mut report)
                    .await?
                {
                    report.process += 1;
                }
            }
        }

        if report.enqueued() > 0 {
            tracing::info!(
                generate = report.generate,
                overdue = report.overdue,
                render = report.render,
                process = report.process,
                duplicates = report.duplicates,
                surfaced = report.surfaced,
                "Scheduler tick enqueued jobs"
            );
        } else {
            tracing::debug!(
                duplicates = report.duplicates,
                surfaced = report.surfaced,
                "Scheduler tick found no new work"
            );
        }
        Ok(report)
    }

    async fn emit(&self, kind: JobKind, report: &mut TickReport) -> Result<bool> {
        let job = Job::new(kind, self.clock.now());
        match self.queue.enqueue(job).await? {
            EnqueueOutcome::Enqueued(_) => Ok(true),
            EnqueueOutcome::Duplicate(existing) => {
                tracing::trace!(job_id = %existing, "Duplicate descriptor dropped");
                report.duplicates += 1;
                Ok(false)
            }
        }
    }

    /// Ticks every `scheduler.interval_secs` until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.scheduler.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_secs = self.config.scheduler.interval_secs, "Scheduler started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Scheduler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick().await {
                            tracing::error!(error = %e, "Scheduler tick failed");
                        }
                    }
                }
            }
        })
    }
}
