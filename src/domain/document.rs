use super::money::{Currency, Money};
use super::subscription::{CustomerId, Period, SubscriptionId};
use crate::error::{BillingError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Invoice,
    Proforma,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Invoice => f.write_str("invoice"),
            DocumentKind::Proforma => f.write_str("proforma"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    Draft,
    Issued,
    Paid,
    Overdue,
    Canceled,
}

impl DocumentState {
    /// The document transition table. Anything not listed here is rejected.
    pub fn can_transition_to(self, next: DocumentState) -> bool {
        use DocumentState::*;
        matches!(
            (self, next),
            (Draft, Issued) | (Issued, Paid) | (Issued, Overdue) | (Draft, Canceled) | (Issued, Canceled)
        )
    }

    /// True once the document went through `issue`; totals are frozen from then on.
    pub fn is_issued(self) -> bool {
        matches!(
            self,
            DocumentState::Issued | DocumentState::Paid | DocumentState::Overdue
        )
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentState::Draft => "draft",
            DocumentState::Issued => "issued",
            DocumentState::Paid => "paid",
            DocumentState::Overdue => "overdue",
            DocumentState::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// A single billed line.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct DocumentEntry {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Money,
}

impl DocumentEntry {
    pub fn total(&self) -> Money {
        self.unit_price * self.quantity
    }
}

/// An invoice or proforma for one subscription period.
///
/// Mutation goes through the methods below so the transition table and
/// the freeze-on-issue rule cannot be bypassed. `version` is bumped by the
/// store on every save and guards against writes from a stale lock holder.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct BillingDocument {
    pub id: DocumentId,
    pub subscription: Option<SubscriptionId>,
    pub customer: CustomerId,
    pub kind: DocumentKind,
    state: DocumentState,
    pub period: Period,
    entries: Vec<DocumentEntry>,
    total: Money,
    pub currency: Currency,
    pub number: Option<u64>,
    pub due_date: Option<DateTime<Utc>>,
    pub artifact: Option<String>,
    pub created_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl BillingDocument {
    pub fn draft(
        subscription: Option<SubscriptionId>,
        customer: CustomerId,
        kind: DocumentKind,
        period: Period,
        currency: Currency,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DocumentId::new(),
            subscription,
            customer,
            kind,
            state: DocumentState::Draft,
            period,
            entries: Vec::new(),
            total: Money::ZERO,
            currency,
            number: None,
            due_date: None,
            artifact: None,
            created_at,
            issued_at: None,
            paid_at: None,
            canceled_at: None,
            version: 0,
        }
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    pub fn entries(&self) -> &[DocumentEntry] {
        &self.entries
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn add_entry(&mut self, entry: DocumentEntry) -> Result<()> {
        if self.state != DocumentState::Draft {
            return Err(BillingError::ValidationError(format!(
                "document {} is {} and can no longer be amended",
                self.id, self.state
            )));
        }
        self.entries.push(entry);
        self.total = self.entries.iter().map(DocumentEntry::total).sum();
        Ok(())
    }

    fn transition(&mut self, next: DocumentState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(BillingError::InvalidTransition {
                entity: "document",
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// `draft -> issued`: totals are finalized and the due date is set.
    pub fn issue(&mut self, now: DateTime<Utc>, due_days: i64, number: u64) -> Result<()> {
        self.transition(DocumentState::Issued)?;
        self.total = self.entries.iter().map(DocumentEntry::total).sum();
        self.number = Some(number);
        self.issued_at = Some(now);
        self.due_date = Some(now + Duration::days(due_days));
        Ok(())
    }

    pub fn pay(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(DocumentState::Paid)?;
        self.paid_at = Some(now);
        Ok(())
    }

    /// `issued -> overdue`, only once the due date has passed.
    pub fn mark_overdue(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.due_date {
            Some(due) if due < now => self.transition(DocumentState::Overdue),
            _ => Err(BillingError::ValidationError(format!(
                "document {} is not past its due date",
                self.id
            ))),
        }
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(DocumentState::Canceled)?;
        self.canceled_at = Some(now);
        Ok(())
    }

    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        self.state == DocumentState::Issued && self.due_date.is_some_and(|due| due < now)
    }
}
