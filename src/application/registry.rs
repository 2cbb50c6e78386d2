use crate::config::ProcessorsConfig;
use crate::domain::ports::{PaymentProcessorRef, ProcessorFactory};
use crate::error::{BillingError, Result};
use crate::infrastructure::manual_processor::{MANUAL, ManualProcessor};
use std::collections::HashMap;
use std::sync::Arc;

/// Typed mapping from processor identifier to implementation.
///
/// Populated once at startup and handed to the transaction processor; it is
/// never mutated afterwards.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, PaymentProcessorRef>,
}

impl ProcessorRegistry {
    pub fn builder() -> ProcessorRegistryBuilder {
        ProcessorRegistryBuilder::default()
    }

    /// Instantiates every enabled processor from `factories`.
    pub fn from_config(
        config: &ProcessorsConfig,
        factories: &HashMap<String, ProcessorFactory>,
    ) -> Result<Self> {
        let mut builder = Self::builder();
        for id in &config.enabled {
            let factory = factories
                .get(id)
                .ok_or_else(|| BillingError::UnknownProcessor(id.clone()))?;
            builder = builder.register(id, factory());
        }
        let registry = builder.build();
        tracing::info!(processors = ?registry.identifiers(), "Payment processors registered");
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Result<PaymentProcessorRef> {
        self.processors
            .get(id)
            .cloned()
            .ok_or_else(|| BillingError::UnknownProcessor(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.processors.contains_key(id)
    }

    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.processors.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[derive(Default)]
pub struct ProcessorRegistryBuilder {
    processors: HashMap<String, PaymentProcessorRef>,
}

impl ProcessorRegistryBuilder {
    pub fn register(mut self, id: impl Into<String>, processor: PaymentProcessorRef) -> Self {
        self.processors.insert(id.into(), processor);
        self
    }

    pub fn build(self) -> ProcessorRegistry {
        ProcessorRegistry {
            processors: self.processors,
        }
    }
}

/// Factories for the processors shipped with the crate.
pub fn builtin_factories() -> HashMap<String, ProcessorFactory> {
    let mut factories: HashMap<String, ProcessorFactory> = HashMap::new();
    factories.insert(
        MANUAL.to_string(),
        Box::new(|| Arc::new(ManualProcessor::new()) as PaymentProcessorRef),
    );
    factories
}
