use super::document::DocumentId;
use super::money::{Currency, Money};
use crate::error::{BillingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Initial,
    Pending,
    Settled,
    Failed,
    Canceled,
}

impl TransactionState {
    pub fn can_transition_to(self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Initial, Pending)
                | (Pending, Settled)
                | (Pending, Failed)
                | (Failed, Pending)
                | (Initial, Canceled)
                | (Pending, Canceled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Settled | TransactionState::Canceled)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Initial => "initial",
            TransactionState::Pending => "pending",
            TransactionState::Settled => "settled",
            TransactionState::Failed => "failed",
            TransactionState::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Failure {
    pub reason: String,
    /// Permanent failures (explicit processor rejections) are never retried.
    pub permanent: bool,
}

/// One attempt to collect the total of a billing document.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub document: DocumentId,
    state: TransactionState,
    pub amount: Money,
    pub currency: Currency,
    pub processor: String,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub external_reference: Option<String>,
    pub failure: Option<Failure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Transaction {
    pub fn new(
        document: DocumentId,
        amount: Money,
        currency: Currency,
        processor: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            document,
            state: TransactionState::Initial,
            amount,
            currency,
            processor: processor.to_string(),
            attempts: 0,
            last_attempt_at: None,
            external_reference: None,
            failure: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Stable key handed to processors on every charge attempt.
    pub fn idempotency_key(&self) -> String {
        format!("txn-{}", self.id.0.simple())
    }

    pub fn is_permanently_failed(&self) -> bool {
        self.state == TransactionState::Failed
            && self.failure.as_ref().is_some_and(|f| f.permanent)
    }

    fn transition(&mut self, next: TransactionState, now: DateTime<Utc>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(BillingError::InvalidTransition {
                entity: "transaction",
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    /// Moves to `pending` and records a new attempt.
    ///
    /// A `failed` transaction may only re-enter `pending` while it is retriable
    /// and below `max_attempts`.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>, max_attempts: u32) -> Result<()> {
        if self.state == TransactionState::Failed {
            if self.is_permanently_failed() {
                return Err(BillingError::ChargeRejected(format!(
                    "transaction {} was permanently rejected",
                    self.id
                )));
            }
            if self.attempts >= max_attempts {
                return Err(BillingError::ValidationError(format!(
                    "transaction {} exhausted {} attempts",
                    self.id, max_attempts
                )));
            }
        }
        self.transition(TransactionState::Pending, now)?;
        self.attempts += 1;
        self.last_attempt_at = Some(now);
        self.failure = None;
        Ok(())
    }

    /// Records another attempt on a transaction left `pending` by an
    /// interrupted worker. The charge is replayed under the same idempotency key.
    pub fn resume_attempt(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != TransactionState::Pending {
            return Err(BillingError::InvalidTransition {
                entity: "transaction",
                from: self.state.to_string(),
                to: TransactionState::Pending.to_string(),
            });
        }
        self.attempts += 1;
        self.last_attempt_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn settle(&mut self, external_reference: String, now: DateTime<Utc>) -> Result<()> {
        self.transition(TransactionState::Settled, now)?;
        self.external_reference = Some(external_reference);
        Ok(())
    }

    pub fn fail(&mut self, reason: String, permanent: bool, now: DateTime<Utc>) -> Result<()> {
        self.transition(TransactionState::Failed, now)?;
        self.failure = Some(Failure { reason, permanent });
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TransactionState::Canceled, now)
    }
}
