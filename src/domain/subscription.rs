use super::money::{Amount, Currency};
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CustomerId(pub u32);

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingCycle {
    /// End of the cycle starting at `start`.
    ///
    /// Month based cycles use calendar months, so a cycle starting on the 31st
    /// ends on the last day of a shorter month.
    pub fn advance(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        let next = match self {
            BillingCycle::Daily => start.checked_add_signed(Duration::days(1)),
            BillingCycle::Weekly => start.checked_add_signed(Duration::days(7)),
            BillingCycle::Monthly => start.checked_add_months(Months::new(1)),
            BillingCycle::Quarterly => start.checked_add_months(Months::new(3)),
            BillingCycle::Yearly => start.checked_add_months(Months::new(12)),
        };
        next.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// A half-open billing window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Compact form used in lock and dedup keys.
    pub fn key(&self) -> String {
        format!("{}", self.start.format("%Y%m%dT%H%M%S"))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub amount: Amount,
    pub currency: Currency,
    pub cycle: BillingCycle,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Trialing,
    Active,
    Canceled,
    Ended,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub customer: CustomerId,
    pub plan: PlanId,
    pub state: SubscriptionState,
    pub cycle: BillingCycle,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
}

impl Subscription {
    pub fn is_billable(&self) -> bool {
        self.state == SubscriptionState::Active
    }

    pub fn current_period(&self) -> Period {
        Period::new(self.current_period_start, self.current_period_end)
    }

    /// Fully elapsed periods at `now`, oldest first.
    ///
    /// The walk starts right after `billed_through`, the latest period already
    /// billed, or at the current period when nothing is billed yet. Callers
    /// take as many as they want from the iterator.
    pub fn completed_periods(
        &self,
        now: DateTime<Utc>,
        billed_through: Option<Period>,
    ) -> impl Iterator<Item = Period> + use<> {
        let cycle = self.cycle;
        let first = match billed_through {
            Some(billed) if billed.end > self.current_period_start => {
                Period::new(billed.end, cycle.advance(billed.end))
            }
            _ => self.current_period(),
        };
        std::iter::successors(Some(first), move |period| {
            Some(Period::new(period.end, cycle.advance(period.end)))
        })
        .take_while(move |period| period.end <= now && period.end > period.start)
    }
}
