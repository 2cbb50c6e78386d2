use super::document::{BillingDocument, DocumentId, DocumentKind, DocumentState};
use super::job::{Job, JobId};
use super::lock::LockToken;
use super::subscription::{Period, Plan, PlanId, Subscription, SubscriptionId};
use super::transaction::{Transaction, TransactionId, TransactionState};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn store(&self, plan: Plan) -> Result<()>;
    async fn get(&self, plan_id: PlanId) -> Result<Option<Plan>>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn store(&self, subscription: Subscription) -> Result<()>;
    async fn get(&self, subscription_id: SubscriptionId) -> Result<Option<Subscription>>;
    async fn get_all(&self) -> Result<Vec<Subscription>>;
}

/// Billing documents, one unit of work per call.
///
/// `insert` enforces uniqueness of (subscription, kind, period start) and
/// `save` rejects a document whose `version` is not the stored one. Both
/// fail with `BillingError::Conflict`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, document: BillingDocument) -> Result<()>;
    async fn save(&self, document: BillingDocument) -> Result<BillingDocument>;
    async fn get(&self, document_id: DocumentId) -> Result<Option<BillingDocument>>;
    async fn find_for_period(
        &self,
        subscription_id: SubscriptionId,
        kind: DocumentKind,
        period_start: DateTime<Utc>,
    ) -> Result<Option<BillingDocument>>;
    /// Period of the `kind` document with the latest start for the subscription.
    async fn latest_period(
        &self,
        subscription_id: SubscriptionId,
        kind: DocumentKind,
    ) -> Result<Option<Period>>;
    async fn list_by_state(&self, state: DocumentState) -> Result<Vec<BillingDocument>>;
    async fn list_for_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<BillingDocument>>;
    async fn get_all(&self) -> Result<Vec<BillingDocument>>;
    /// Next sequential number for issued documents of `kind`.
    async fn next_number(&self, kind: DocumentKind) -> Result<u64>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: Transaction) -> Result<()>;
    async fn save(&self, tx: Transaction) -> Result<Transaction>;
    async fn get(&self, tx_id: TransactionId) -> Result<Option<Transaction>>;
    async fn list_for_document(&self, document_id: DocumentId) -> Result<Vec<Transaction>>;
    async fn list_by_state(&self, state: TransactionState) -> Result<Vec<Transaction>>;
}

/// Shared key-value store with expiry backing the lock manager.
///
/// All three operations must be atomic on the backing store.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Sets `key` to `token` with `ttl` only if the key is absent or expired.
    async fn set_if_absent(&self, key: &str, token: LockToken, ttl: Duration) -> Result<bool>;
    /// Extends the expiry only if `key` currently holds `token`.
    async fn compare_and_renew(&self, key: &str, token: LockToken, ttl: Duration) -> Result<bool>;
    /// Deletes `key` only if it currently holds `token`.
    async fn compare_and_delete(&self, key: &str, token: LockToken) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(JobId),
    /// A job with the same dedup key is still pending or running.
    Duplicate(JobId),
}

/// At-least-once job delivery.
///
/// A dequeued job is leased; if it is neither acked, retried nor nacked before
/// the lease runs out it becomes visible again.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<EnqueueOutcome>;
    async fn dequeue(&self) -> Result<Option<Job>>;
    async fn ack(&self, job_id: JobId) -> Result<()>;
    /// Marks the job failed terminally and keeps it for operator attention.
    async fn nack(&self, job_id: JobId, reason: &str) -> Result<()>;
    /// Makes the job visible again at `at`, counting one more attempt.
    async fn retry(&self, job_id: JobId, at: DateTime<Utc>, reason: &str) -> Result<()>;
    /// Makes the job visible again at `at` without counting an attempt.
    async fn reschedule(&self, job_id: JobId, at: DateTime<Utc>) -> Result<()>;
    /// Jobs that gave up, keeping only the latest failure per dedup key.
    async fn failed_jobs(&self) -> Result<Vec<Job>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Settled { external_reference: String },
    Rejected { reason: String },
    TransientError { reason: String },
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Charges the transaction amount. Repeated calls with the same
    /// `idempotency_key` must not charge twice.
    async fn charge(&self, transaction: &Transaction, idempotency_key: &str) -> ChargeOutcome;
    fn supports_refund(&self) -> bool;
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, document: &BillingDocument) -> Result<Vec<u8>>;

    fn extension(&self) -> &'static str {
        "txt"
    }
}

#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Stores `bytes` under `path` and returns a URL referencing it.
    async fn put(&self, bytes: Vec<u8>, path: &str) -> Result<String>;
    async fn get(&self, path: &str) -> Result<Vec<u8>>;
}

pub type ClockRef = Arc<dyn Clock>;
pub type PlanStoreRef = Arc<dyn PlanStore>;
pub type SubscriptionStoreRef = Arc<dyn SubscriptionStore>;
pub type DocumentStoreRef = Arc<dyn DocumentStore>;
pub type TransactionStoreRef = Arc<dyn TransactionStore>;
pub type LockStoreRef = Arc<dyn LockStore>;
pub type JobQueueRef = Arc<dyn JobQueue>;
pub type PaymentProcessorRef = Arc<dyn PaymentProcessor>;
pub type RendererRef = Arc<dyn Renderer>;
pub type ArtifactStorageRef = Arc<dyn ArtifactStorage>;

pub type ProcessorFactory = Box<dyn Fn() -> PaymentProcessorRef + Send + Sync>;
