use super::generator::DocumentGenerator;
use super::processor::TransactionProcessor;
use crate::domain::document::{BillingDocument, DocumentId, DocumentState};
use crate::domain::job::{Job, JobKind};
use crate::domain::ports::{ClockRef, DocumentStoreRef, EnqueueOutcome, JobQueueRef, SubscriptionStoreRef};
use crate::domain::subscription::{SubscriptionId, SubscriptionState};
use crate::domain::transaction::{Transaction, TransactionId};
use crate::error::{BillingError, Result};
use std::sync::Arc;

/// Operator commands issued by outer layers (admin UI, API).
///
/// Each maps onto a single component operation or job; no business rules
/// live here.
pub struct BillingCommands {
    clock: ClockRef,
    queue: JobQueueRef,
    subscriptions: SubscriptionStoreRef,
    documents: DocumentStoreRef,
    generator: Arc<DocumentGenerator>,
    processor: Arc<TransactionProcessor>,
}

impl BillingCommands {
    pub fn new(
        clock: ClockRef,
        queue: JobQueueRef,
        subscriptions: SubscriptionStoreRef,
        documents: DocumentStoreRef,
        generator: Arc<DocumentGenerator>,
        processor: Arc<TransactionProcessor>,
    ) -> Self {
        Self {
            clock,
            queue,
            subscriptions,
            documents,
            generator,
            processor,
        }
    }

    /// Re-renders the artifact of an issued document.
    pub async fn regenerate_document(&self, document_id: DocumentId) -> Result<EnqueueOutcome> {
        let document = self
            .documents
            .get(document_id)
            .await?
            .ok_or_else(|| BillingError::not_found("document", document_id))?;
        if !document.state().is_issued() {
            return Err(BillingError::ValidationError(format!(
                "document {} is {} and has no artifact to regenerate",
                document.id,
                document.state()
            )));
        }
        self.enqueue(JobKind::RenderDocument {
            document: document_id,
            force: true,
        })
        .await
    }

    pub async fn retry_transaction(&self, transaction_id: TransactionId) -> Result<EnqueueOutcome> {
        self.processor.retry(transaction_id).await?;
        self.enqueue(JobKind::ProcessTransaction {
            transaction: transaction_id,
        })
        .await
    }

    pub async fn cancel_transaction(&self, transaction_id: TransactionId) -> Result<Transaction> {
        self.processor.cancel(transaction_id).await
    }

    /// Open transactions of the document are canceled on their next run.
    pub async fn cancel_document(&self, document_id: DocumentId) -> Result<BillingDocument> {
        self.generator.cancel(document_id).await
    }

    /// Marks the subscription canceled and cancels its draft documents.
    /// Issued documents stay collectible.
    pub async fn cancel_subscription(&self, subscription_id: SubscriptionId) -> Result<Vec<DocumentId>> {
        let mut subscription = self
            .subscriptions
            .get(subscription_id)
            .await?
            .ok_or_else(|| BillingError::not_found("subscription", subscription_id))?;
        if subscription.state != SubscriptionState::Canceled {
            subscription.state = SubscriptionState::Canceled;
            self.subscriptions.store(subscription).await?;
            tracing::info!(subscription_id = %subscription_id, "Subscription canceled");
        }

        let mut canceled = Vec::new();
        for document in self.documents.list_for_subscription(subscription_id).await? {
            if document.state() == DocumentState::Draft {
                let document = self.generator.cancel(document.id).await?;
                canceled.push(document.id);
            }
        }
        Ok(canceled)
    }

    async fn enqueue(&self, kind: JobKind) -> Result<EnqueueOutcome> {
        let outcome = self.queue.enqueue(Job::new(kind, self.clock.now())).await?;
        if let EnqueueOutcome::Duplicate(job_id) = outcome {
            tracing::info!(job_id = %job_id, "Equivalent job already queued");
        }
        Ok(outcome)
    }
}
