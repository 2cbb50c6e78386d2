use crate::domain::document::BillingDocument;
use crate::domain::ports::Renderer;
use crate::error::{BillingError, Result};
use async_trait::async_trait;
use std::fmt::Write;

/// Renders a document as a fixed-width plain-text statement.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextRenderer;

impl TextRenderer {
    pub fn new() -> Self {
        Self
    }

    fn layout(document: &BillingDocument) -> std::result::Result<String, std::fmt::Error> {
        let mut out = String::new();
        let number = document
            .number
            .map(|n| format!("#{n:06}"))
            .unwrap_or_else(|| "(draft)".to_string());
        writeln!(out, "{} {}", document.kind.to_string().to_uppercase(), number)?;
        writeln!(out, "Customer: {}", document.customer)?;
        writeln!(out, "Period:   {}", document.period)?;
        if let Some(issued) = document.issued_at {
            writeln!(out, "Issued:   {}", issued.format("%Y-%m-%d"))?;
        }
        if let Some(due) = document.due_date {
            writeln!(out, "Due:      {}", due.format("%Y-%m-%d"))?;
        }
        writeln!(out)?;
        for entry in document.entries() {
            writeln!(
                out,
                "{:<40} {:>6} x {:>10} = {:>12}",
                entry.description,
                entry.quantity.normalize(),
                entry.unit_price,
                entry.total()
            )?;
        }
        writeln!(out, "{:>76}", format!("Total: {} {}", document.total(), document.currency))?;
        Ok(out)
    }
}

#[async_trait]
impl Renderer for TextRenderer {
    async fn render(&self, document: &BillingDocument) -> Result<Vec<u8>> {
        let text = Self::layout(document)
            .map_err(|e| BillingError::RenderError(e.to_string()))?;
        Ok(text.into_bytes())
    }
}
