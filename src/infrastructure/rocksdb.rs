use crate::domain::document::{BillingDocument, DocumentId, DocumentKind, DocumentState};
use crate::domain::ports::{DocumentStore, PlanStore, SubscriptionStore, TransactionStore};
use crate::domain::subscription::{Period, Plan, PlanId, Subscription, SubscriptionId};
use crate::domain::transaction::{Transaction, TransactionId, TransactionState};
use crate::error::{BillingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for plans.
pub const CF_PLANS: &str = "plans";
/// Column Family for subscriptions.
pub const CF_SUBSCRIPTIONS: &str = "subscriptions";
/// Column Family for billing documents.
pub const CF_DOCUMENTS: &str = "documents";
/// Unique index (subscription, kind, period start) -> document id.
pub const CF_DOCUMENT_PERIODS: &str = "document_periods";
/// Column Family for transactions.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Per-kind document number counters.
pub const CF_COUNTERS: &str = "counters";

const COLUMN_FAMILIES: [&str; 6] = [
    CF_PLANS,
    CF_SUBSCRIPTIONS,
    CF_DOCUMENTS,
    CF_DOCUMENT_PERIODS,
    CF_TRANSACTIONS,
    CF_COUNTERS,
];

/// A persistent store implementation using RocksDB.
///
/// Each entity lives in its own Column Family and is stored as JSON.
/// Read-check-write sequences (unique insert, versioned save, counters) are
/// serialized by `write_guard` and committed as one `WriteBatch`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_guard: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// any missing column family.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_guard: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            BillingError::InternalError(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn get_json<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_pinned_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(cf, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn scan_json<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }
}

fn period_prefix(subscription: SubscriptionId, kind: DocumentKind) -> Vec<u8> {
    let mut key = Vec::with_capacity(13);
    key.extend_from_slice(&subscription.0.to_be_bytes());
    key.push(match kind {
        DocumentKind::Invoice => 0,
        DocumentKind::Proforma => 1,
    });
    key
}

/// Big-endian timestamps keep one subscription's periods in start order.
fn period_key(subscription: SubscriptionId, kind: DocumentKind, start: DateTime<Utc>) -> Vec<u8> {
    let mut key = period_prefix(subscription, kind);
    key.extend_from_slice(&start.timestamp().to_be_bytes());
    key
}

#[async_trait]
impl PlanStore for RocksDBStore {
    async fn store(&self, plan: Plan) -> Result<()> {
        self.put_json(CF_PLANS, &plan.id.0.to_be_bytes(), &plan)
    }

    async fn get(&self, plan_id: PlanId) -> Result<Option<Plan>> {
        self.get_json(CF_PLANS, &plan_id.0.to_be_bytes())
    }
}

#[async_trait]
impl SubscriptionStore for RocksDBStore {
    async fn store(&self, subscription: Subscription) -> Result<()> {
        self.put_json(
            CF_SUBSCRIPTIONS,
            &subscription.id.0.to_be_bytes(),
            &subscription,
        )
    }

    async fn get(&self, subscription_id: SubscriptionId) -> Result<Option<Subscription>> {
        self.get_json(CF_SUBSCRIPTIONS, &subscription_id.0.to_be_bytes())
    }

    async fn get_all(&self) -> Result<Vec<Subscription>> {
        // big-endian keys keep id order
        self.scan_json(CF_SUBSCRIPTIONS)
    }
}

#[async_trait]
impl DocumentStore for RocksDBStore {
    async fn insert(&self, document: BillingDocument) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let key = document.id.0.as_bytes().to_vec();
        if self
            .get_json::<BillingDocument>(CF_DOCUMENTS, &key)?
            .is_some()
        {
            return Err(BillingError::Conflict(format!(
                "document {} already exists",
                document.id
            )));
        }

        let mut batch = WriteBatch::default();
        if let Some(subscription) = document.subscription {
            let index_key = period_key(subscription, document.kind, document.period.start);
            let index_cf = self.cf(CF_DOCUMENT_PERIODS)?;
            if self.db.get_pinned_cf(index_cf, &index_key)?.is_some() {
                return Err(BillingError::Conflict(format!(
                    "subscription {} already has {} for {}",
                    subscription, document.kind, document.period
                )));
            }
            batch.put_cf(index_cf, index_key, key.clone());
        }
        batch.put_cf(self.cf(CF_DOCUMENTS)?, key, serde_json::to_vec(&document)?);
        self.db.write(batch)?;
        Ok(())
    }

    async fn save(&self, mut document: BillingDocument) -> Result<BillingDocument> {
        let _guard = self.write_guard.lock().await;
        let key = document.id.0.as_bytes().to_vec();
        let stored: BillingDocument = self
            .get_json(CF_DOCUMENTS, &key)?
            .ok_or_else(|| BillingError::not_found("document", document.id))?;
        if stored.version != document.version {
            return Err(BillingError::Conflict(format!(
                "document {} was modified concurrently (version {} != {})",
                document.id, document.version, stored.version
            )));
        }
        document.version += 1;
        self.put_json(CF_DOCUMENTS, &key, &document)?;
        Ok(document)
    }

    async fn get(&self, document_id: DocumentId) -> Result<Option<BillingDocument>> {
        self.get_json(CF_DOCUMENTS, document_id.0.as_bytes())
    }

    async fn find_for_period(
        &self,
        subscription_id: SubscriptionId,
        kind: DocumentKind,
        period_start: DateTime<Utc>,
    ) -> Result<Option<BillingDocument>> {
        let index_cf = self.cf(CF_DOCUMENT_PERIODS)?;
        let index_key = period_key(subscription_id, kind, period_start);
        match self.db.get_cf(index_cf, index_key)? {
            Some(document_key) => self.get_json(CF_DOCUMENTS, &document_key),
            None => Ok(None),
        }
    }

    async fn latest_period(
        &self,
        subscription_id: SubscriptionId,
        kind: DocumentKind,
    ) -> Result<Option<Period>> {
        let index_cf = self.cf(CF_DOCUMENT_PERIODS)?;
        let prefix = period_prefix(subscription_id, kind);
        let mut upper = prefix.clone();
        upper.extend_from_slice(&[0xff; 8]);
        let mut iter = self
            .db
            .iterator_cf(index_cf, IteratorMode::From(&upper, Direction::Reverse));
        match iter.next().transpose()? {
            Some((key, document_key)) if key.starts_with(&prefix) => Ok(self
                .get_json::<BillingDocument>(CF_DOCUMENTS, &document_key)?
                .map(|d| d.period)),
            _ => Ok(None),
        }
    }

    async fn list_by_state(&self, state: DocumentState) -> Result<Vec<BillingDocument>> {
        let mut documents: Vec<BillingDocument> = self.scan_json(CF_DOCUMENTS)?;
        documents.retain(|d| d.state() == state);
        documents.sort_by_key(|d| d.created_at);
        Ok(documents)
    }

    async fn list_for_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<BillingDocument>> {
        let mut documents: Vec<BillingDocument> = self.scan_json(CF_DOCUMENTS)?;
        documents.retain(|d| d.subscription == Some(subscription_id));
        documents.sort_by_key(|d| d.period.start);
        Ok(documents)
    }

    async fn get_all(&self) -> Result<Vec<BillingDocument>> {
        let mut documents: Vec<BillingDocument> = self.scan_json(CF_DOCUMENTS)?;
        documents.sort_by(|a, b| {
            (a.subscription, a.period.start).cmp(&(b.subscription, b.period.start))
        });
        Ok(documents)
    }

    async fn next_number(&self, kind: DocumentKind) -> Result<u64> {
        let _guard = self.write_guard.lock().await;
        let key = kind.to_string();
        let current: u64 = self.get_json(CF_COUNTERS, key.as_bytes())?.unwrap_or(0);
        let next = current + 1;
        self.put_json(CF_COUNTERS, key.as_bytes(), &next)?;
        Ok(next)
    }
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn insert(&self, tx: Transaction) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let key = tx.id.0.as_bytes().to_vec();
        if self.get_json::<Transaction>(CF_TRANSACTIONS, &key)?.is_some() {
            return Err(BillingError::Conflict(format!(
                "transaction {} already exists",
                tx.id
            )));
        }
        self.put_json(CF_TRANSACTIONS, &key, &tx)
    }

    async fn save(&self, mut tx: Transaction) -> Result<Transaction> {
        let _guard = self.write_guard.lock().await;
        let key = tx.id.0.as_bytes().to_vec();
        let stored: Transaction = self
            .get_json(CF_TRANSACTIONS, &key)?
            .ok_or_else(|| BillingError::not_found("transaction", tx.id))?;
        if stored.version != tx.version {
            return Err(BillingError::Conflict(format!(
                "transaction {} was modified concurrently (version {} != {})",
                tx.id, tx.version, stored.version
            )));
        }
        tx.version += 1;
        self.put_json(CF_TRANSACTIONS, &key, &tx)?;
        Ok(tx)
    }

    async fn get(&self, tx_id: TransactionId) -> Result<Option<Transaction>> {
        self.get_json(CF_TRANSACTIONS, tx_id.0.as_bytes())
    }

    async fn list_for_document(&self, document_id: DocumentId) -> Result<Vec<Transaction>> {
        let mut transactions: Vec<Transaction> = self.scan_json(CF_TRANSACTIONS)?;
        transactions.retain(|t| t.document == document_id);
        transactions.sort_by_key(|t| t.created_at);
        Ok(transactions)
    }

    async fn list_by_state(&self, state: TransactionState) -> Result<Vec<Transaction>> {
        let mut transactions: Vec<Transaction> = self.scan_json(CF_TRANSACTIONS)?;
        transactions.retain(|t| t.state() == state);
        transactions.sort_by_key(|t| t.created_at);
        Ok(transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::document::DocumentEntry;
    use crate::domain::money::{Amount, Currency, Money};
    use crate::domain::subscription::{BillingCycle, CustomerId};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn document() -> BillingDocument {
        let start = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        let mut doc = BillingDocument::draft(
            Some(SubscriptionId(1)),
            CustomerId(1),
            DocumentKind::Invoice,
            Period::new(start, end),
            Currency::new("EUR").unwrap(),
            end,
        );
        doc.add_entry(DocumentEntry {
            description: "Basic".to_string(),
            quantity: dec!(1),
            unit_price: Money::new(dec!(10)),
        })
        .unwrap();
        doc
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");
        for name in COLUMN_FAMILIES {
            assert!(store.db.cf_handle(name).is_some(), "{name}");
        }
    }

    #[tokio::test]
    async fn test_rocksdb_plan_store() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let plan = Plan {
            id: PlanId(3),
            name: "Pro".to_string(),
            amount: Amount::new(dec!(20)).unwrap(),
            currency: Currency::new("USD").unwrap(),
            cycle: BillingCycle::Monthly,
        };
        PlanStore::store(&store, plan.clone()).await.unwrap();
        assert_eq!(PlanStore::get(&store, PlanId(3)).await.unwrap(), Some(plan));
    }

    #[tokio::test]
    async fn test_rocksdb_document_uniqueness_and_versioning() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let doc = document();
        DocumentStore::insert(&store, doc.clone()).await.unwrap();
        assert!(matches!(
            DocumentStore::insert(&store, document()).await,
            Err(BillingError::Conflict(_))
        ));

        let found = store
            .find_for_period(SubscriptionId(1), DocumentKind::Invoice, doc.period.start)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, doc.id);

        let saved = DocumentStore::save(&store, doc.clone()).await.unwrap();
        assert_eq!(saved.version, 1);
        assert!(matches!(
            DocumentStore::save(&store, doc).await,
            Err(BillingError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_rocksdb_latest_period_per_subscription_and_kind() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        assert_eq!(
            store.latest_period(SubscriptionId(1), DocumentKind::Invoice).await.unwrap(),
            None
        );

        let september = document();
        let mut august = document();
        august.id = DocumentId::new();
        august.period = Period::new(
            Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
            september.period.start,
        );
        let mut other = document();
        other.id = DocumentId::new();
        other.subscription = Some(SubscriptionId(2));
        other.period = Period::new(september.period.end, september.period.end + chrono::Duration::days(30));
        let mut proforma = other.clone();
        proforma.id = DocumentId::new();
        proforma.subscription = Some(SubscriptionId(1));
        proforma.kind = DocumentKind::Proforma;
        for doc in [september.clone(), august, other, proforma] {
            DocumentStore::insert(&store, doc).await.unwrap();
        }

        assert_eq!(
            store.latest_period(SubscriptionId(1), DocumentKind::Invoice).await.unwrap(),
            Some(september.period)
        );
        assert_eq!(
            store.latest_period(SubscriptionId(3), DocumentKind::Invoice).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_rocksdb_counters_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            assert_eq!(store.next_number(DocumentKind::Invoice).await.unwrap(), 1);
        }
        let store = RocksDBStore::open(dir.path()).unwrap();
        assert_eq!(store.next_number(DocumentKind::Invoice).await.unwrap(), 2);
    }
}
