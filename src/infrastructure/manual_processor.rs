use crate::domain::ports::{ChargeOutcome, PaymentProcessor};
use crate::domain::transaction::Transaction;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Identifier the manual processor is registered under.
pub const MANUAL: &str = "manual";

/// Payments collected outside the system (bank transfer, cash).
///
/// A charge is recorded as settled straight away. Charges are keyed by
/// idempotency key, so a replayed call returns the first reference.
#[derive(Default, Clone)]
pub struct ManualProcessor {
    charges: Arc<Mutex<HashMap<String, String>>>,
}

impl ManualProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn charge_count(&self) -> usize {
        self.charges.lock().await.len()
    }
}

#[async_trait]
impl PaymentProcessor for ManualProcessor {
    async fn charge(&self, transaction: &Transaction, idempotency_key: &str) -> ChargeOutcome {
        let mut charges = self.charges.lock().await;
        let reference = charges
            .entry(idempotency_key.to_string())
            .or_insert_with(|| format!("manual-{}", transaction.id.0.simple()))
            .clone();
        ChargeOutcome::Settled {
            external_reference: reference,
        }
    }

    fn supports_refund(&self) -> bool {
        false
    }
}
