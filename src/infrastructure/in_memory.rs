use crate::domain::document::{BillingDocument, DocumentId, DocumentKind, DocumentState};
use crate::domain::ports::{DocumentStore, PlanStore, SubscriptionStore, TransactionStore};
use crate::domain::subscription::{Period, Plan, PlanId, Subscription, SubscriptionId};
use crate::domain::transaction::{Transaction, TransactionId, TransactionState};
use crate::error::{BillingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store for plans.
#[derive(Default, Clone)]
pub struct InMemoryPlanStore {
    plans: Arc<RwLock<HashMap<PlanId, Plan>>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn store(&self, plan: Plan) -> Result<()> {
        let mut plans = self.plans.write().await;
        plans.insert(plan.id, plan);
        Ok(())
    }

    async fn get(&self, plan_id: PlanId) -> Result<Option<Plan>> {
        let plans = self.plans.read().await;
        Ok(plans.get(&plan_id).cloned())
    }
}

/// A thread-safe in-memory store for subscriptions.
#[derive(Default, Clone)]
pub struct InMemorySubscriptionStore {
    subscriptions: Arc<RwLock<HashMap<SubscriptionId, Subscription>>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn store(&self, subscription: Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.insert(subscription.id, subscription);
        Ok(())
    }

    async fn get(&self, subscription_id: SubscriptionId) -> Result<Option<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions.get(&subscription_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        let mut all: Vec<_> = subscriptions.values().cloned().collect();
        all.sort_by_key(|s| s.id);
        Ok(all)
    }
}

type PeriodKey = (SubscriptionId, DocumentKind, DateTime<Utc>);

#[derive(Default)]
struct DocumentTables {
    documents: HashMap<DocumentId, BillingDocument>,
    by_period: HashMap<PeriodKey, DocumentId>,
    numbers: HashMap<DocumentKind, u64>,
}

/// A thread-safe in-memory store for billing documents.
///
/// All tables live behind one `RwLock`, so each call is a single unit of work:
/// the uniqueness check and the insert cannot interleave with another writer.
#[derive(Default, Clone)]
pub struct InMemoryDocumentStore {
    tables: Arc<RwLock<DocumentTables>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(&self, document: BillingDocument) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.documents.contains_key(&document.id) {
            return Err(BillingError::Conflict(format!(
                "document {} already exists",
                document.id
            )));
        }
        if let Some(subscription) = document.subscription {
            let key = (subscription, document.kind, document.period.start);
            if let Some(existing) = tables.by_period.get(&key) {
                return Err(BillingError::Conflict(format!(
                    "subscription {} already has {} {} for {}",
                    subscription, document.kind, existing, document.period
                )));
            }
            tables.by_period.insert(key, document.id);
        }
        tables.documents.insert(document.id, document);
        Ok(())
    }

    async fn save(&self, mut document: BillingDocument) -> Result<BillingDocument> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .documents
            .get_mut(&document.id)
            .ok_or_else(|| BillingError::not_found("document", document.id))?;
        if stored.version != document.version {
            return Err(BillingError::Conflict(format!(
                "document {} was modified concurrently (version {} != {})",
                document.id, document.version, stored.version
            )));
        }
        document.version += 1;
        *stored = document.clone();
        Ok(document)
    }

    async fn get(&self, document_id: DocumentId) -> Result<Option<BillingDocument>> {
        let tables = self.tables.read().await;
        Ok(tables.documents.get(&document_id).cloned())
    }

    async fn find_for_period(
        &self,
        subscription_id: SubscriptionId,
        kind: DocumentKind,
        period_start: DateTime<Utc>,
    ) -> Result<Option<BillingDocument>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_period
            .get(&(subscription_id, kind, period_start))
            .and_then(|id| tables.documents.get(id))
            .cloned())
    }

    async fn latest_period(
        &self,
        subscription_id: SubscriptionId,
        kind: DocumentKind,
    ) -> Result<Option<Period>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_period
            .iter()
            .filter(|((subscription, k, _), _)| *subscription == subscription_id && *k == kind)
            .max_by_key(|((_, _, start), _)| *start)
            .and_then(|(_, id)| tables.documents.get(id))
            .map(|d| d.period))
    }

    async fn list_by_state(&self, state: DocumentState) -> Result<Vec<BillingDocument>> {
        let tables = self.tables.read().await;
        let mut documents: Vec<_> = tables
            .documents
            .values()
            .filter(|d| d.state() == state)
            .cloned()
            .collect();
        documents.sort_by_key(|d| d.created_at);
        Ok(documents)
    }

    async fn list_for_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<BillingDocument>> {
        let tables = self.tables.read().await;
        let mut documents: Vec<_> = tables
            .documents
            .values()
            .filter(|d| d.subscription == Some(subscription_id))
            .cloned()
            .collect();
        documents.sort_by_key(|d| d.period.start);
        Ok(documents)
    }

    async fn get_all(&self) -> Result<Vec<BillingDocument>> {
        let tables = self.tables.read().await;
        let mut documents: Vec<_> = tables.documents.values().cloned().collect();
        documents.sort_by(|a, b| {
            (a.subscription, a.period.start).cmp(&(b.subscription, b.period.start))
        });
        Ok(documents)
    }

    async fn next_number(&self, kind: DocumentKind) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let counter = tables.numbers.entry(kind).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

/// A thread-safe in-memory store for transactions.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    transactions: Arc<RwLock<HashMap<TransactionId, Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: Transaction) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&tx.id) {
            return Err(BillingError::Conflict(format!(
                "transaction {} already exists",
                tx.id
            )));
        }
        transactions.insert(tx.id, tx);
        Ok(())
    }

    async fn save(&self, mut tx: Transaction) -> Result<Transaction> {
        let mut transactions = self.transactions.write().await;
        let stored = transactions
            .get_mut(&tx.id)
            .ok_or_else(|| BillingError::not_found("transaction", tx.id))?;
        if stored.version != tx.version {
            return Err(BillingError::Conflict(format!(
                "transaction {} was modified concurrently (version {} != {})",
                tx.id, tx.version, stored.version
            )));
        }
        tx.version += 1;
        *stored = tx.clone();
        Ok(tx)
    }

    async fn get(&self, tx_id: TransactionId) -> Result<Option<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions.get(&tx_id).cloned())
    }

    async fn list_for_document(&self, document_id: DocumentId) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut matching: Vec<_> = transactions
            .values()
            .filter(|t| t.document == document_id)
            .cloned()
            .collect();
        matching.sort_by_key(|t| t.created_at);
        Ok(matching)
    }

    async fn list_by_state(&self, state: TransactionState) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut matching: Vec<_> = transactions
            .values()
            .filter(|t| t.state() == state)
            .cloned()
            .collect();
        matching.sort_by_key(|t| t.created_at);
        Ok(matching)
    }
}
