use crate::domain::money::{Amount, Currency};
use crate::domain::subscription::{
    BillingCycle, CustomerId, Plan, PlanId, Subscription, SubscriptionId, SubscriptionState,
};
use crate::error::{BillingError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One row of the subscriptions file. Each row carries its plan inline.
#[derive(Debug, Deserialize)]
struct SubscriptionRecord {
    subscription: u32,
    customer: u32,
    plan: u32,
    plan_name: Option<String>,
    amount: Decimal,
    currency: String,
    cycle: BillingCycle,
    period_start: String,
    period_end: Option<String>,
    state: Option<SubscriptionState>,
}

impl SubscriptionRecord {
    fn into_domain(self) -> Result<(Plan, Subscription)> {
        let cycle = self.cycle;
        let plan = Plan {
            id: PlanId(self.plan),
            name: self
                .plan_name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| format!("Plan {}", self.plan)),
            amount: Amount::try_from(self.amount)?,
            currency: Currency::new(&self.currency)?,
            cycle,
        };
        let start = parse_timestamp(&self.period_start)?;
        let end = match self.period_end.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => parse_timestamp(raw)?,
            None => cycle.advance(start),
        };
        if end <= start {
            return Err(BillingError::ValidationError(format!(
                "subscription {} period ends before it starts",
                self.subscription
            )));
        }
        let subscription = Subscription {
            id: SubscriptionId(self.subscription),
            customer: CustomerId(self.customer),
            plan: plan.id,
            state: self.state.unwrap_or(SubscriptionState::Active),
            cycle,
            current_period_start: start,
            current_period_end: end,
        };
        Ok((plan, subscription))
    }
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| BillingError::ValidationError(format!("invalid timestamp: {raw:?}")))
}

/// Reads subscriptions, with their plans, from a CSV source.
///
/// Columns: `subscription, customer, plan, plan_name, amount, currency, cycle,
/// period_start, period_end, state`. `plan_name`, `period_end` and `state`
/// may be left empty.
pub struct SubscriptionReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> SubscriptionReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily yields one `(plan, subscription)` pair per row.
    pub fn subscriptions(self) -> impl Iterator<Item = Result<(Plan, Subscription)>> {
        self.reader
            .into_deserialize::<SubscriptionRecord>()
            .map(|result| result.map_err(BillingError::from)?.into_domain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    const HEADER: &str =
        "subscription, customer, plan, plan_name, amount, currency, cycle, period_start, period_end, state";

    #[test]
    fn test_reader_valid_stream() {
        let data = format!(
            "{HEADER}\n1, 10, 100, Pro, 49.90, eur, monthly, 2026-09-01, 2026-10-01, active\n2, 11, 101, , 5, USD, weekly, 2026-09-01T00:00:00Z, , trialing"
        );
        let reader = SubscriptionReader::new(data.as_bytes());
        let rows: Vec<_> = reader.subscriptions().collect::<Result<_>>().unwrap();

        assert_eq!(rows.len(), 2);
        let (plan, sub) = &rows[0];
        assert_eq!(plan.name, "Pro");
        assert_eq!(plan.amount, Amount::try_from(dec!(49.90)).unwrap());
        assert_eq!(plan.currency.code(), "EUR");
        assert_eq!(sub.state, SubscriptionState::Active);
        assert_eq!(
            sub.current_period_end,
            Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()
        );

        let (plan, sub) = &rows[1];
        assert_eq!(plan.name, "Plan 101");
        assert_eq!(sub.state, SubscriptionState::Trialing);
        assert_eq!(
            sub.current_period_end,
            Utc.with_ymd_and_hms(2026, 9, 8, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = format!("{HEADER}\n1, 10, 100, Pro, -3, EUR, monthly, 2026-09-01, , active\n1, 10, 100, Pro, 3, EUR, fortnightly, 2026-09-01, , active");
        let reader = SubscriptionReader::new(data.as_bytes());
        let results: Vec<_> = reader.subscriptions().collect();

        assert!(results[0].is_err());
        assert!(results[1].is_err());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2026-09-01").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-09-01T02:00:00+02:00").unwrap(), expected);
        assert!(parse_timestamp("01/09/2026").is_err());
    }
}
