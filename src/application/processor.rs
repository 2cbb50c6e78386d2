use super::generator::DocumentGenerator;
use super::lock_manager::LockManager;
use super::registry::ProcessorRegistry;
use crate::config::BillingConfig;
use crate::domain::document::{DocumentId, DocumentState};
use crate::domain::lock::LockKey;
use crate::domain::ports::{ChargeOutcome, ClockRef, DocumentStoreRef, TransactionStoreRef};
use crate::domain::transaction::{Transaction, TransactionId, TransactionState};
use crate::error::{BillingError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Result of one `process` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Settled(Transaction),
    /// Terminal already (or its document was canceled); nothing was charged.
    Unchanged(Transaction),
    /// The processor refused the charge; the transaction will not be retried.
    Rejected(Transaction),
    /// Timed out or failed transiently; run `process` again after `delay`.
    RetryScheduled {
        transaction: Transaction,
        delay: Duration,
    },
    /// Failed transiently with no attempts left; needs an operator.
    Exhausted(Transaction),
}

/// Drives transactions through `initial -> pending -> {settled, failed}`.
///
/// Every charge carries the transaction's idempotency key, so replays after a
/// timeout or a crashed worker are deduplicated by the processor.
pub struct TransactionProcessor {
    config: Arc<BillingConfig>,
    clock: ClockRef,
    locks: Arc<LockManager>,
    registry: Arc<ProcessorRegistry>,
    documents: DocumentStoreRef,
    transactions: TransactionStoreRef,
    generator: Arc<DocumentGenerator>,
}

impl TransactionProcessor {
    pub fn new(
        config: Arc<BillingConfig>,
        clock: ClockRef,
        locks: Arc<LockManager>,
        registry: Arc<ProcessorRegistry>,
        documents: DocumentStoreRef,
        transactions: TransactionStoreRef,
        generator: Arc<DocumentGenerator>,
    ) -> Self {
        Self {
            config,
            clock,
            locks,
            registry,
            documents,
            transactions,
            generator,
        }
    }

    pub fn transaction_key(transaction_id: TransactionId) -> LockKey {
        LockKey::new("transaction", transaction_id)
    }

    fn lock_ttl(&self) -> Duration {
        self.config
            .locks
            .ttl_for(self.config.transactions.settle_time_limit())
    }

    /// Returns the live transaction of an issued document, creating it with
    /// the default processor if there is none.
    ///
    /// A transaction is live unless it is canceled or permanently failed.
    pub async fn create_for_document(&self, document_id: DocumentId) -> Result<Transaction> {
        let key = DocumentGenerator::document_key(document_id);
        self.locks
            .run_exclusive(&key, self.config.locks.ttl(), || async {
                let document = self
                    .documents
                    .get(document_id)
                    .await?
                    .ok_or_else(|| BillingError::not_found("document", document_id))?;
                // overdue documents have no way to paid, so charging them is refused
                if document.state() != DocumentState::Issued {
                    return Err(BillingError::ValidationError(format!(
                        "document {} is {} and cannot be charged",
                        document.id,
                        document.state()
                    )));
                }

                let existing = self.transactions.list_for_document(document_id).await?;
                if let Some(live) = existing.into_iter().find(|tx| {
                    tx.state() != TransactionState::Canceled && !tx.is_permanently_failed()
                }) {
                    return Ok(live);
                }

                let processor = &self.config.transactions.default_processor;
                if !self.registry.contains(processor) {
                    return Err(BillingError::UnknownProcessor(processor.clone()));
                }
                let tx = Transaction::new(
                    document.id,
                    document.total(),
                    document.currency.clone(),
                    processor,
                    self.clock.now(),
                );
                self.transactions.insert(tx.clone()).await?;
                tracing::info!(
                    transaction_id = %tx.id,
                    document_id = %document.id,
                    amount = %tx.amount,
                    processor = %tx.processor,
                    "Transaction created"
                );
                Ok(tx)
            })
            .await
    }

    /// Runs one charge attempt under `transaction:{id}`.
    pub async fn process(&self, transaction_id: TransactionId) -> Result<ProcessOutcome> {
        let key = Self::transaction_key(transaction_id);
        self.locks
            .run_exclusive(&key, self.lock_ttl(), || self.process_locked(transaction_id))
            .await
    }

    async fn process_locked(&self, transaction_id: TransactionId) -> Result<ProcessOutcome> {
        let mut tx = self.load(transaction_id).await?;
        let max_attempts = self.config.transactions.max_attempts;

        match tx.state() {
            TransactionState::Settled => {
                // a crash between settle and paid propagation lands here on replay
                self.propagate_paid(&tx).await?;
                return Ok(ProcessOutcome::Unchanged(tx));
            }
            TransactionState::Canceled => return Ok(ProcessOutcome::Unchanged(tx)),
            TransactionState::Failed if tx.is_permanently_failed() => {
                return Ok(ProcessOutcome::Rejected(tx));
            }
            TransactionState::Failed if tx.attempts >= max_attempts => {
                return Ok(ProcessOutcome::Exhausted(tx));
            }
            _ => {}
        }

        let document = self
            .documents
            .get(tx.document)
            .await?
            .ok_or_else(|| BillingError::not_found("document", tx.document))?;
        if document.state() == DocumentState::Canceled {
            let now = self.clock.now();
            if matches!(tx.state(), TransactionState::Initial | TransactionState::Pending) {
                tx.cancel(now)?;
                tx = self.transactions.save(tx).await?;
                tracing::info!(transaction_id = %tx.id, "Transaction canceled with its document");
            }
            return Ok(ProcessOutcome::Unchanged(tx));
        }
        if document.state() == DocumentState::Overdue && tx.state() != TransactionState::Pending {
            // a settlement could never mark the document paid
            let now = self.clock.now();
            tx.begin_attempt(now, max_attempts)?;
            tx.fail(format!("document {} is overdue", document.id), true, now)?;
            let tx = self.transactions.save(tx).await?;
            tracing::error!(
                transaction_id = %tx.id,
                document_id = %document.id,
                "Charge refused for overdue document, manual intervention required"
            );
            return Ok(ProcessOutcome::Rejected(tx));
        }

        let processor = match self.registry.get(&tx.processor) {
            Ok(processor) => processor,
            Err(e) => {
                tracing::error!(transaction_id = %tx.id, processor = %tx.processor, "Processor not registered");
                if tx.state() != TransactionState::Pending {
                    tx.begin_attempt(self.clock.now(), max_attempts)?;
                }
                tx.fail(e.to_string(), true, self.clock.now())?;
                return Ok(ProcessOutcome::Rejected(self.transactions.save(tx).await?));
            }
        };

        let now = self.clock.now();
        if tx.state() == TransactionState::Pending {
            tracing::warn!(transaction_id = %tx.id, attempts = tx.attempts, "Resuming interrupted charge");
            tx.resume_attempt(now)?;
        } else {
            tx.begin_attempt(now, max_attempts)?;
        }
        // the attempt is durable before the processor sees it
        let mut tx = self.transactions.save(tx).await?;

        let limit = self.config.transactions.settle_time_limit();
        let key = tx.idempotency_key();
        let outcome = match tokio::time::timeout(limit, processor.charge(&tx, &key)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(transaction_id = %tx.id, limit_secs = limit.as_secs(), "Charge timed out");
                ChargeOutcome::TransientError {
                    reason: format!("charge exceeded {}s", limit.as_secs()),
                }
            }
        };

        let now = self.clock.now();
        match outcome {
            ChargeOutcome::Settled { external_reference } => {
                tx.settle(external_reference, now)?;
                let tx = self.transactions.save(tx).await?;
                tracing::info!(
                    transaction_id = %tx.id,
                    document_id = %tx.document,
                    external_reference = ?tx.external_reference,
                    "Transaction settled"
                );
                self.propagate_paid(&tx).await?;
                Ok(ProcessOutcome::Settled(tx))
            }
            ChargeOutcome::Rejected { reason } => {
                tx.fail(reason, true, now)?;
                let tx = self.transactions.save(tx).await?;
                tracing::error!(
                    transaction_id = %tx.id,
                    document_id = %tx.document,
                    reason = ?tx.failure.as_ref().map(|f| &f.reason),
                    "Charge rejected, manual intervention required"
                );
                Ok(ProcessOutcome::Rejected(tx))
            }
            ChargeOutcome::TransientError { reason } => {
                tx.fail(reason, false, now)?;
                let tx = self.transactions.save(tx).await?;
                if tx.attempts >= max_attempts {
                    tracing::error!(
                        transaction_id = %tx.id,
                        attempts = tx.attempts,
                        "Charge retries exhausted, manual intervention required"
                    );
                    Ok(ProcessOutcome::Exhausted(tx))
                } else {
                    let delay = self.config.workers.retry_delay(tx.attempts);
                    tracing::warn!(
                        transaction_id = %tx.id,
                        attempts = tx.attempts,
                        delay_secs = delay.as_secs(),
                        "Charge failed transiently, retry scheduled"
                    );
                    Ok(ProcessOutcome::RetryScheduled {
                        transaction: tx,
                        delay,
                    })
                }
            }
        }
    }

    async fn propagate_paid(&self, tx: &Transaction) -> Result<()> {
        match self.generator.mark_paid(tx.document).await {
            Ok(_) => Ok(()),
            Err(e @ BillingError::InvalidTransition { .. }) => {
                // overdue or canceled documents have no transition to paid
                tracing::error!(
                    transaction_id = %tx.id,
                    document_id = %tx.document,
                    error = %e,
                    "Settled transaction could not mark its document paid, manual intervention required"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// `{initial, pending} -> canceled`.
    pub async fn cancel(&self, transaction_id: TransactionId) -> Result<Transaction> {
        let key = Self::transaction_key(transaction_id);
        self.locks
            .run_exclusive(&key, self.lock_ttl(), || async {
                let mut tx = self.load(transaction_id).await?;
                tx.cancel(self.clock.now())?;
                let tx = self.transactions.save(tx).await?;
                tracing::info!(transaction_id = %tx.id, "Transaction canceled");
                Ok(tx)
            })
            .await
    }

    /// Checks that an operator retry is allowed. The caller enqueues the
    /// process job; the attempt itself is counted when it runs.
    pub async fn retry(&self, transaction_id: TransactionId) -> Result<Transaction> {
        let tx = self.load(transaction_id).await?;
        match tx.state() {
            TransactionState::Failed if tx.is_permanently_failed() => Err(BillingError::ChargeRejected(
                format!("transaction {} was permanently rejected", tx.id),
            )),
            TransactionState::Failed if tx.attempts >= self.config.transactions.max_attempts => {
                Err(BillingError::ValidationError(format!(
                    "transaction {} exhausted {} attempts",
                    tx.id, self.config.transactions.max_attempts
                )))
            }
            TransactionState::Initial | TransactionState::Pending | TransactionState::Failed => Ok(tx),
            state => Err(BillingError::InvalidTransition {
                entity: "transaction",
                from: state.to_string(),
                to: TransactionState::Pending.to_string(),
            }),
        }
    }

    async fn load(&self, transaction_id: TransactionId) -> Result<Transaction> {
        self.transactions
            .get(transaction_id)
            .await?
            .ok_or_else(|| BillingError::not_found("transaction", transaction_id))
    }
}
