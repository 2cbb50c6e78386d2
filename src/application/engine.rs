use super::commands::BillingCommands;
use super::generator::DocumentGenerator;
use super::lock_manager::LockManager;
use super::processor::TransactionProcessor;
use super::registry::ProcessorRegistry;
use super::renderer::DocumentRenderer;
use super::scheduler::{Scheduler, TickReport};
use super::worker::WorkerPool;
use crate::config::BillingConfig;
use crate::domain::document::BillingDocument;
use crate::domain::ports::{
    ArtifactStorageRef, ClockRef, DocumentStoreRef, JobQueueRef, LockStoreRef, PlanStoreRef,
    RendererRef, SubscriptionStoreRef, TransactionStoreRef,
};
use crate::error::{BillingError, Result};
use crate::infrastructure::in_memory::{
    InMemoryDocumentStore, InMemoryPlanStore, InMemorySubscriptionStore, InMemoryTransactionStore,
};
use crate::infrastructure::lock::InMemoryLockStore;
use crate::infrastructure::queue::InMemoryJobQueue;
use crate::infrastructure::storage::InMemoryArtifactStorage;
use crate::infrastructure::text_renderer::TextRenderer;
use std::sync::Arc;

/// Adapters behind every port the engine talks to.
#[derive(Clone)]
pub struct Backends {
    pub clock: ClockRef,
    pub plans: PlanStoreRef,
    pub subscriptions: SubscriptionStoreRef,
    pub documents: DocumentStoreRef,
    pub transactions: TransactionStoreRef,
    pub locks: LockStoreRef,
    pub queue: JobQueueRef,
    pub renderer: RendererRef,
    pub storage: ArtifactStorageRef,
}

impl Backends {
    /// Everything in process: stores, locks, queue and artifacts.
    pub fn in_memory(clock: ClockRef, config: &BillingConfig) -> Self {
        Self {
            plans: Arc::new(InMemoryPlanStore::new()),
            subscriptions: Arc::new(InMemorySubscriptionStore::new()),
            documents: Arc::new(InMemoryDocumentStore::new()),
            transactions: Arc::new(InMemoryTransactionStore::new()),
            locks: Arc::new(InMemoryLockStore::new(clock.clone())),
            queue: Arc::new(InMemoryJobQueue::new(clock.clone(), &config.queue)),
            renderer: Arc::new(TextRenderer::new()),
            storage: Arc::new(InMemoryArtifactStorage::new()),
            clock,
        }
    }
}

/// The billing engine with all of its components wired together.
///
/// Built once at startup from an explicit configuration value, a set of
/// backends and the processor registry.
pub struct BillingEngine {
    config: Arc<BillingConfig>,
    backends: Backends,
    locks: Arc<LockManager>,
    generator: Arc<DocumentGenerator>,
    processor: Arc<TransactionProcessor>,
    renderer: Arc<DocumentRenderer>,
    scheduler: Arc<Scheduler>,
    workers: Arc<WorkerPool>,
    commands: BillingCommands,
}

impl BillingEngine {
    pub fn new(config: BillingConfig, backends: Backends, registry: ProcessorRegistry) -> Result<Self> {
        config.validate()?;
        if !registry.contains(&config.transactions.default_processor) {
            return Err(BillingError::UnknownProcessor(
                config.transactions.default_processor.clone(),
            ));
        }
        let config = Arc::new(config);
        let registry = Arc::new(registry);
        let b = backends.clone();

        let locks = Arc::new(LockManager::new(b.locks, &config.locks));
        let generator = Arc::new(DocumentGenerator::new(
            config.clone(),
            b.clock.clone(),
            locks.clone(),
            b.plans,
            b.subscriptions.clone(),
            b.documents.clone(),
            b.transactions.clone(),
        ));
        let processor = Arc::new(TransactionProcessor::new(
            config.clone(),
            b.clock.clone(),
            locks.clone(),
            registry,
            b.documents.clone(),
            b.transactions.clone(),
            generator.clone(),
        ));
        let renderer = Arc::new(DocumentRenderer::new(
            config.clone(),
            locks.clone(),
            b.documents.clone(),
            b.renderer,
            b.storage,
        ));
        let scheduler = Arc::new(Scheduler::new(
            config.clone(),
            b.clock.clone(),
            b.queue.clone(),
            b.subscriptions.clone(),
            b.documents.clone(),
            b.transactions,
        ));
        let workers = Arc::new(WorkerPool::new(
            config.clone(),
            b.clock.clone(),
            b.queue.clone(),
            generator.clone(),
            processor.clone(),
            renderer.clone(),
        ));
        let commands = BillingCommands::new(
            b.clock,
            b.queue,
            b.subscriptions,
            b.documents,
            generator.clone(),
            processor.clone(),
        );

        Ok(Self {
            config,
            backends,
            locks,
            generator,
            processor,
            renderer,
            scheduler,
            workers,
            commands,
        })
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn generator(&self) -> &Arc<DocumentGenerator> {
        &self.generator
    }

    pub fn processor(&self) -> &Arc<TransactionProcessor> {
        &self.processor
    }

    pub fn renderer(&self) -> &Arc<DocumentRenderer> {
        &self.renderer
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn workers(&self) -> &Arc<WorkerPool> {
        &self.workers
    }

    pub fn commands(&self) -> &BillingCommands {
        &self.commands
    }

    /// One scheduler tick followed by a full drain of the worker pool.
    pub async fn run_cycle(&self) -> Result<(TickReport, usize)> {
        let report = self.scheduler.tick().await?;
        let handled = self.workers.drain().await?;
        Ok((report, handled))
    }

    /// All documents, oldest period first.
    pub async fn documents(&self) -> Result<Vec<BillingDocument>> {
        let mut documents = self.backends.documents.get_all().await?;
        documents.sort_by(|a, b| {
            (a.subscription, a.period.start, a.created_at).cmp(&(b.subscription, b.period.start, b.created_at))
        });
        Ok(documents)
    }
}
