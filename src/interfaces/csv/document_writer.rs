use crate::domain::document::BillingDocument;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct DocumentRow {
    document: String,
    subscription: String,
    customer: u32,
    kind: String,
    number: String,
    state: String,
    period_start: String,
    period_end: String,
    total: String,
    currency: String,
    due_date: String,
    artifact: String,
}

impl From<&BillingDocument> for DocumentRow {
    fn from(doc: &BillingDocument) -> Self {
        let date = |ts: chrono::DateTime<chrono::Utc>| ts.format("%Y-%m-%d").to_string();
        Self {
            document: doc.id.to_string(),
            subscription: doc.subscription.map(|s| s.to_string()).unwrap_or_default(),
            customer: doc.customer.0,
            kind: doc.kind.to_string(),
            number: doc.number.map(|n| n.to_string()).unwrap_or_default(),
            state: doc.state().to_string(),
            period_start: date(doc.period.start),
            period_end: date(doc.period.end),
            total: doc.total().to_string(),
            currency: doc.currency.to_string(),
            due_date: doc.due_date.map(date).unwrap_or_default(),
            artifact: doc.artifact.clone().unwrap_or_default(),
        }
    }
}

/// Writes billing documents as a CSV report, one row per document.
pub struct DocumentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> DocumentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_documents<'a>(
        &mut self,
        documents: impl IntoIterator<Item = &'a BillingDocument>,
    ) -> Result<()> {
        for doc in documents {
            self.writer.serialize(DocumentRow::from(doc))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
