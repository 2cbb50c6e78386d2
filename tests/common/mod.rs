#![allow(dead_code)]

use async_trait::async_trait;
use billrun::application::engine::{Backends, BillingEngine};
use billrun::application::registry::ProcessorRegistry;
use billrun::config::BillingConfig;
use billrun::domain::document::BillingDocument;
use billrun::domain::money::{Amount, Currency};
use billrun::domain::ports::{ChargeOutcome, PaymentProcessor, Renderer};
use billrun::domain::subscription::{
    BillingCycle, CustomerId, Plan, PlanId, Subscription, SubscriptionId, SubscriptionState,
};
use billrun::domain::transaction::Transaction;
use billrun::error::Result;
use billrun::infrastructure::clock::ManualClock;
use billrun::infrastructure::queue::InMemoryJobQueue;
use billrun::infrastructure::storage::InMemoryArtifactStorage;
use billrun::infrastructure::text_renderer::TextRenderer;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SCRIPTED: &str = "scripted";

pub fn period_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap()
}

pub fn period_end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()
}

/// What the scripted processor does on its next call.
#[derive(Debug, Clone)]
pub enum Step {
    Settle,
    /// Settles upstream, then answers only after `Duration`.
    SettleSlowly(Duration),
    Reject(&'static str),
    Transient(&'static str),
}

/// A payment gateway double that follows a script and, like a real gateway,
/// never settles the same idempotency key twice.
#[derive(Default)]
pub struct ScriptedProcessor {
    script: Mutex<VecDeque<Step>>,
    settled: Mutex<HashMap<String, String>>,
    calls: AtomicUsize,
}

impl ScriptedProcessor {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Distinct charges that were actually collected upstream.
    pub fn settlements(&self) -> usize {
        self.settled.lock().unwrap().len()
    }

    fn settle(&self, key: &str) -> String {
        let mut settled = self.settled.lock().unwrap();
        let next = settled.len() + 1;
        settled
            .entry(key.to_string())
            .or_insert_with(|| format!("ext-{next}"))
            .clone()
    }
}

#[async_trait]
impl PaymentProcessor for ScriptedProcessor {
    async fn charge(&self, _transaction: &Transaction, idempotency_key: &str) -> ChargeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reference) = self.settled.lock().unwrap().get(idempotency_key).cloned() {
            return ChargeOutcome::Settled {
                external_reference: reference,
            };
        }
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Settle);
        match step {
            Step::Settle => ChargeOutcome::Settled {
                external_reference: self.settle(idempotency_key),
            },
            Step::SettleSlowly(delay) => {
                let reference = self.settle(idempotency_key);
                tokio::time::sleep(delay).await;
                ChargeOutcome::Settled {
                    external_reference: reference,
                }
            }
            Step::Reject(reason) => ChargeOutcome::Rejected {
                reason: reason.to_string(),
            },
            Step::Transient(reason) => ChargeOutcome::TransientError {
                reason: reason.to_string(),
            },
        }
    }

    fn supports_refund(&self) -> bool {
        true
    }
}

/// Renders with the text renderer after a fixed delay.
pub struct SlowRenderer {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowRenderer {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for SlowRenderer {
    async fn render(&self, document: &BillingDocument) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        TextRenderer::new().render(document).await
    }
}

/// Config with the scripted processor as the only, default processor.
pub fn config() -> BillingConfig {
    let mut config = BillingConfig::default();
    config.processors.enabled = vec![SCRIPTED.to_string()];
    config.transactions.default_processor = SCRIPTED.to_string();
    config
}

pub struct Harness {
    pub engine: BillingEngine,
    pub clock: ManualClock,
    pub queue: InMemoryJobQueue,
    pub storage: InMemoryArtifactStorage,
    pub processor: Arc<ScriptedProcessor>,
    pub renderer: Arc<SlowRenderer>,
}

impl Harness {
    /// Engine over in-memory backends, with the clock just after the
    /// fixture period ends.
    pub fn new(config: BillingConfig, processor: Arc<ScriptedProcessor>) -> Self {
        Self::with_renderer(config, processor, SlowRenderer::new(Duration::ZERO))
    }

    pub fn with_renderer(
        config: BillingConfig,
        processor: Arc<ScriptedProcessor>,
        renderer: Arc<SlowRenderer>,
    ) -> Self {
        let clock = ManualClock::new(period_end() + chrono::Duration::hours(1));
        let queue = InMemoryJobQueue::new(Arc::new(clock.clone()), &config.queue);
        let storage = InMemoryArtifactStorage::new();

        let mut backends = Backends::in_memory(Arc::new(clock.clone()), &config);
        backends.queue = Arc::new(queue.clone());
        backends.storage = Arc::new(storage.clone());
        backends.renderer = renderer.clone();

        let registry = ProcessorRegistry::builder()
            .register(SCRIPTED, processor.clone())
            .build();
        let engine = BillingEngine::new(config, backends, registry).unwrap();
        Self {
            engine,
            clock,
            queue,
            storage,
            processor,
            renderer,
        }
    }

    pub fn backends(&self) -> &Backends {
        self.engine.backends()
    }

    /// Stores a monthly 49.90 EUR plan and a subscription on it whose
    /// current period is September 2026.
    pub async fn seed_subscription(&self, id: u32, state: SubscriptionState) -> Subscription {
        self.seed_subscription_from(id, state, period_start(), period_end()).await
    }

    pub async fn seed_subscription_from(
        &self,
        id: u32,
        state: SubscriptionState,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Subscription {
        let plan = Plan {
            id: PlanId(1),
            name: "Pro".to_string(),
            amount: Amount::try_from(dec!(49.90)).unwrap(),
            currency: Currency::new("EUR").unwrap(),
            cycle: BillingCycle::Monthly,
        };
        let subscription = Subscription {
            id: SubscriptionId(id),
            customer: CustomerId(100 + id),
            plan: plan.id,
            state,
            cycle: BillingCycle::Monthly,
            current_period_start: start,
            current_period_end: end,
        };
        self.backends().plans.store(plan).await.unwrap();
        self.backends()
            .subscriptions
            .store(subscription.clone())
            .await
            .unwrap();
        subscription
    }

    pub async fn documents(&self) -> Vec<BillingDocument> {
        self.engine.documents().await.unwrap()
    }

    pub async fn transactions_for(&self, document: &BillingDocument) -> Vec<Transaction> {
        self.backends()
            .transactions
            .list_for_document(document.id)
            .await
            .unwrap()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(chrono::Duration::from_std(by).unwrap());
    }
}
