use super::lock_manager::LockManager;
use crate::config::BillingConfig;
use crate::domain::document::{BillingDocument, DocumentEntry, DocumentId, DocumentState};
use crate::domain::lock::LockKey;
use crate::domain::ports::{ClockRef, DocumentStoreRef, PlanStoreRef, SubscriptionStoreRef, TransactionStoreRef};
use crate::domain::subscription::{Period, SubscriptionId};
use crate::domain::transaction::TransactionState;
use crate::error::{BillingError, Result};
use rust_decimal::Decimal;
use std::sync::Arc;

const TRANSITION_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum Generated {
    Created(BillingDocument),
    /// A document for the period already existed; nothing was written.
    Existing(BillingDocument),
    /// The subscription is no longer billable.
    Skipped,
}

impl Generated {
    pub fn document(&self) -> Option<&BillingDocument> {
        match self {
            Generated::Created(doc) | Generated::Existing(doc) => Some(doc),
            Generated::Skipped => None,
        }
    }
}

/// Materializes billing documents and owns their state transitions.
///
/// Every mutation runs under a lock: `generate-documents:{subscription}:{period}`
/// while creating, `document:{id}` for every transition afterwards.
pub struct DocumentGenerator {
    config: Arc<BillingConfig>,
    clock: ClockRef,
    locks: Arc<LockManager>,
    plans: PlanStoreRef,
    subscriptions: SubscriptionStoreRef,
    documents: DocumentStoreRef,
    transactions: TransactionStoreRef,
}

impl DocumentGenerator {
    pub fn new(
        config: Arc<BillingConfig>,
        clock: ClockRef,
        locks: Arc<LockManager>,
        plans: PlanStoreRef,
        subscriptions: SubscriptionStoreRef,
        documents: DocumentStoreRef,
        transactions: TransactionStoreRef,
    ) -> Self {
        Self {
            config,
            clock,
            locks,
            plans,
            subscriptions,
            documents,
            transactions,
        }
    }

    pub fn generate_key(subscription_id: SubscriptionId, period: &Period) -> LockKey {
        LockKey::new(
            "generate-documents",
            format!("{}:{}", subscription_id, period.key()),
        )
    }

    pub fn document_key(document_id: DocumentId) -> LockKey {
        LockKey::new("document", document_id)
    }

    /// Creates the draft document for `period`, or returns the one already there.
    pub async fn generate(&self, subscription_id: SubscriptionId, period: Period) -> Result<Generated> {
        let key = Self::generate_key(subscription_id, &period);
        self.locks
            .run_exclusive(&key, self.config.locks.ttl(), || {
                self.generate_locked(subscription_id, period)
            })
            .await
    }

    async fn generate_locked(&self, subscription_id: SubscriptionId, period: Period) -> Result<Generated> {
        let kind = self.config.documents.kind;
        if let Some(existing) = self
            .documents
            .find_for_period(subscription_id, kind, period.start)
            .await?
        {
            tracing::debug!(
                subscription_id = %subscription_id,
                document_id = %existing.id,
                period = %period,
                "Document already generated for period"
            );
            return Ok(Generated::Existing(existing));
        }

        let subscription = self
            .subscriptions
            .get(subscription_id)
            .await?
            .ok_or_else(|| BillingError::not_found("subscription", subscription_id))?;
        if !subscription.is_billable() {
            tracing::info!(
                subscription_id = %subscription_id,
                state = ?subscription.state,
                "Subscription no longer billable, skipping generation"
            );
            return Ok(Generated::Skipped);
        }
        let plan = self
            .plans
            .get(subscription.plan)
            .await?
            .ok_or_else(|| BillingError::not_found("plan", subscription.plan))?;

        let mut document = BillingDocument::draft(
            Some(subscription.id),
            subscription.customer,
            kind,
            period,
            plan.currency.clone(),
            self.clock.now(),
        );
        document.add_entry(DocumentEntry {
            description: format!("{} ({})", plan.name, period),
            quantity: Decimal::ONE,
            unit_price: plan.amount.into(),
        })?;

        match self.documents.insert(document.clone()).await {
            Ok(()) => {}
            Err(BillingError::Conflict(_)) => {
                // the unique index won a race the lock did not see (expired lease)
                if let Some(existing) = self
                    .documents
                    .find_for_period(subscription_id, kind, period.start)
                    .await?
                {
                    return Ok(Generated::Existing(existing));
                }
                return Err(BillingError::Conflict(format!(
                    "document for subscription {subscription_id} period {period} conflicts"
                )));
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            subscription_id = %subscription_id,
            document_id = %document.id,
            period = %period,
            total = %document.total(),
            "Draft document generated"
        );
        Ok(Generated::Created(document))
    }

    /// `draft -> issued`. Issuing an already issued document is a no-op.
    pub async fn issue(&self, document_id: DocumentId) -> Result<BillingDocument> {
        self.transition(document_id, |generator, mut document| async move {
            if document.state().is_issued() {
                return Ok(document);
            }
            let number = generator.documents.next_number(document.kind).await?;
            let now = generator.clock.now();
            document.issue(now, generator.config.documents.due_days, number)?;
            let document = generator.documents.save(document).await?;
            tracing::info!(
                document_id = %document.id,
                number,
                due_date = ?document.due_date,
                "Document issued"
            );
            Ok(document)
        })
        .await
    }

    pub async fn cancel(&self, document_id: DocumentId) -> Result<BillingDocument> {
        self.transition(document_id, |generator, mut document| async move {
            document.cancel(generator.clock.now())?;
            let document = generator.documents.save(document).await?;
            tracing::info!(document_id = %document.id, "Document canceled");
            Ok(document)
        })
        .await
    }

    /// `issued -> paid`; replaying it on a paid document is a no-op.
    pub async fn mark_paid(&self, document_id: DocumentId) -> Result<BillingDocument> {
        self.transition(document_id, |generator, mut document| async move {
            if document.state() == DocumentState::Paid {
                return Ok(document);
            }
            document.pay(generator.clock.now())?;
            let document = generator.documents.save(document).await?;
            tracing::info!(document_id = %document.id, "Document paid");
            Ok(document)
        })
        .await
    }

    /// `issued -> overdue` when the due date passed without a settled
    /// transaction and no charge is in flight. Returns whether the document
    /// transitioned.
    pub async fn mark_overdue(&self, document_id: DocumentId) -> Result<bool> {
        self.transition(document_id, |generator, mut document| async move {
            let now = generator.clock.now();
            if !document.is_past_due(now) {
                return Ok(false);
            }
            let transactions = generator.transactions.list_for_document(document.id).await?;
            if transactions.iter().any(|tx| tx.state() == TransactionState::Settled) {
                tracing::debug!(document_id = %document.id, "Past due but settled, awaiting paid propagation");
                return Ok(false);
            }
            if transactions.iter().any(|tx| tx.state() == TransactionState::Pending) {
                tracing::debug!(document_id = %document.id, "Past due with a charge in flight");
                return Ok(false);
            }
            document.mark_overdue(now)?;
            let document = generator.documents.save(document).await?;
            tracing::warn!(document_id = %document.id, due_date = ?document.due_date, "Document overdue");
            Ok(true)
        })
        .await
    }

    /// Loads the document under `document:{id}` and applies `apply`.
    ///
    /// Only artifact recording writes a document without this lock, so a
    /// version conflict is resolved by reloading and applying again.
    async fn transition<'a, T, F, Fut>(&'a self, document_id: DocumentId, apply: F) -> Result<T>
    where
        F: Fn(&'a Self, BillingDocument) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let key = Self::document_key(document_id);
        self.locks
            .run_exclusive(&key, self.config.locks.ttl(), || async move {
                let mut attempt = 1;
                loop {
                    let document = self
                        .documents
                        .get(document_id)
                        .await?
                        .ok_or_else(|| BillingError::not_found("document", document_id))?;
                    let from = document.state();
                    match apply(self, document).await {
                        Err(BillingError::Conflict(reason)) if attempt < TRANSITION_ATTEMPTS => {
                            tracing::debug!(document_id = %document_id, reason = %reason, "Document changed concurrently, reapplying");
                            attempt += 1;
                        }
                        Err(e @ BillingError::InvalidTransition { .. }) => {
                            tracing::warn!(document_id = %document_id, state = %from, error = %e, "Rejected document transition");
                            return Err(e);
                        }
                        result => return result,
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::domain::money::{Amount, Currency};
    use crate::domain::ports::{Clock, PlanStore, SubscriptionStore};
    use crate::domain::subscription::{
        BillingCycle, CustomerId, Plan, PlanId, Subscription, SubscriptionState,
    };
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::{
        InMemoryDocumentStore, InMemoryPlanStore, InMemorySubscriptionStore,
        InMemoryTransactionStore,
    };
    use crate::infrastructure::lock::InMemoryLockStore;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    struct Fixture {
        generator: DocumentGenerator,
        clock: ManualClock,
        locks: Arc<LockManager>,
        period: Period,
    }

    async fn fixture(state: SubscriptionState) -> Fixture {
        let start = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(end + Duration::hours(1));
        let plans = Arc::new(InMemoryPlanStore::new());
        let subscriptions = Arc::new(InMemorySubscriptionStore::new());
        plans
            .store(Plan {
                id: PlanId(1),
                name: "Pro".to_string(),
                amount: Amount::try_from(dec!(49.90)).unwrap(),
                currency: Currency::new("EUR").unwrap(),
                cycle: BillingCycle::Monthly,
            })
            .await
            .unwrap();
        subscriptions
            .store(Subscription {
                id: SubscriptionId(42),
                customer: CustomerId(7),
                plan: PlanId(1),
                state,
                cycle: BillingCycle::Monthly,
                current_period_start: start,
                current_period_end: end,
            })
            .await
            .unwrap();
        let locks = Arc::new(LockManager::new(
            Arc::new(InMemoryLockStore::new(Arc::new(clock.clone()))),
            &LockConfig::default(),
        ));
        let generator = DocumentGenerator::new(
            Arc::new(BillingConfig::default()),
            Arc::new(clock.clone()),
            locks.clone(),
            plans,
            subscriptions,
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(InMemoryTransactionStore::new()),
        );
        Fixture {
            generator,
            clock,
            locks,
            period: Period::new(start, end),
        }
    }

    #[tokio::test]
    async fn test_generate_is_idempotent() {
        let f = fixture(SubscriptionState::Active).await;
        let first = f.generator.generate(SubscriptionId(42), f.period).await.unwrap();
        let second = f.generator.generate(SubscriptionId(42), f.period).await.unwrap();

        let Generated::Created(created) = first else {
            panic!("expected a new draft");
        };
        assert_eq!(created.state(), DocumentState::Draft);
        assert_eq!(created.total().to_string(), "49.9");
        assert_eq!(second, Generated::Existing(created));
    }

    #[tokio::test]
    async fn test_generate_skips_canceled_subscription() {
        let f = fixture(SubscriptionState::Canceled).await;
        let result = f.generator.generate(SubscriptionId(42), f.period).await.unwrap();
        assert_eq!(result, Generated::Skipped);
    }

    #[tokio::test]
    async fn test_generate_reports_busy_lock() {
        let f = fixture(SubscriptionState::Active).await;
        let key = DocumentGenerator::generate_key(SubscriptionId(42), &f.period);
        let _held = f.locks.acquire(&key, f.generator.config.locks.ttl()).await.unwrap();
        let result = f.generator.generate(SubscriptionId(42), f.period).await;
        assert!(matches!(result, Err(BillingError::LockBusy(_))));
    }

    #[tokio::test]
    async fn test_issue_sets_due_date_and_number() {
        let f = fixture(SubscriptionState::Active).await;
        let Generated::Created(doc) = f.generator.generate(SubscriptionId(42), f.period).await.unwrap() else {
            panic!("expected a new draft");
        };
        let issued = f.generator.issue(doc.id).await.unwrap();
        let now = f.clock.now();
        assert_eq!(issued.state(), DocumentState::Issued);
        assert_eq!(issued.issued_at, Some(now));
        assert_eq!(issued.due_date, Some(now + Duration::days(5)));
        assert_eq!(issued.number, Some(1));

        // a second issue is a no-op, not a renumbering
        let again = f.generator.issue(doc.id).await.unwrap();
        assert_eq!(again.number, Some(1));
    }

    #[tokio::test]
    async fn test_illegal_transition_leaves_document_unchanged() {
        let f = fixture(SubscriptionState::Active).await;
        let Generated::Created(doc) = f.generator.generate(SubscriptionId(42), f.period).await.unwrap() else {
            panic!("expected a new draft");
        };
        let result = f.generator.mark_paid(doc.id).await;
        assert!(matches!(result, Err(BillingError::InvalidTransition { .. })));
        let stored = f.generator.documents.get(doc.id).await.unwrap().unwrap();
        assert_eq!(stored.state(), DocumentState::Draft);
    }

    #[tokio::test]
    async fn test_mark_overdue_after_due_date() {
        let f = fixture(SubscriptionState::Active).await;
        let Generated::Created(doc) = f.generator.generate(SubscriptionId(42), f.period).await.unwrap() else {
            panic!("expected a new draft");
        };
        f.generator.issue(doc.id).await.unwrap();
        assert!(!f.generator.mark_overdue(doc.id).await.unwrap());

        f.clock.advance(Duration::days(6));
        assert!(f.generator.mark_overdue(doc.id).await.unwrap());
        let stored = f.generator.documents.get(doc.id).await.unwrap().unwrap();
        assert_eq!(stored.state(), DocumentState::Overdue);
    }
}
