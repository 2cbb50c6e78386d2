use super::lock_manager::LockManager;
use crate::config::BillingConfig;
use crate::domain::document::{BillingDocument, DocumentId, DocumentState};
use crate::domain::lock::LockKey;
use crate::domain::ports::{ArtifactStorageRef, DocumentStoreRef, RendererRef};
use crate::error::{BillingError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Attempts to record the artifact when the document moved under us.
const ARTIFACT_SAVE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered(String),
    AlreadyRendered(String),
    /// Canceled documents are not rendered.
    Skipped,
}

/// Produces and stores the artifact of an issued document.
///
/// Rendering only ever writes the `artifact` field.
pub struct DocumentRenderer {
    config: Arc<BillingConfig>,
    locks: Arc<LockManager>,
    documents: DocumentStoreRef,
    renderer: RendererRef,
    storage: ArtifactStorageRef,
}

impl DocumentRenderer {
    pub fn new(
        config: Arc<BillingConfig>,
        locks: Arc<LockManager>,
        documents: DocumentStoreRef,
        renderer: RendererRef,
        storage: ArtifactStorageRef,
    ) -> Self {
        Self {
            config,
            locks,
            documents,
            renderer,
            storage,
        }
    }

    pub fn render_key(document_id: DocumentId) -> LockKey {
        LockKey::new("render", document_id)
    }

    pub fn artifact_path(&self, document: &BillingDocument) -> String {
        format!(
            "{}{}/{}.{}",
            self.config.documents.storage_prefix,
            document.kind,
            document.id,
            self.renderer.extension()
        )
    }

    /// Renders under `render:{id}`; with `force` an existing artifact is replaced.
    pub async fn render(&self, document_id: DocumentId, force: bool) -> Result<RenderOutcome> {
        let limit = self.config.documents.render_time_limit();
        let key = Self::render_key(document_id);
        self.locks
            .run_exclusive(&key, self.config.locks.ttl_for(limit), || {
                self.render_locked(document_id, force, limit)
            })
            .await
    }

    async fn render_locked(
        &self,
        document_id: DocumentId,
        force: bool,
        limit: Duration,
    ) -> Result<RenderOutcome> {
        let document = self.load(document_id).await?;
        match document.state() {
            DocumentState::Canceled => return Ok(RenderOutcome::Skipped),
            DocumentState::Draft => {
                return Err(BillingError::ValidationError(format!(
                    "document {document_id} is not issued yet"
                )));
            }
            DocumentState::Issued | DocumentState::Paid | DocumentState::Overdue => {}
        }
        if let Some(url) = &document.artifact
            && !force
        {
            return Ok(RenderOutcome::AlreadyRendered(url.clone()));
        }

        let bytes = tokio::time::timeout(limit, self.renderer.render(&document))
            .await
            .map_err(|_| {
                tracing::warn!(document_id = %document_id, limit_secs = limit.as_secs(), "Render timed out");
                BillingError::Timeout {
                    operation: "render",
                    limit,
                }
            })??;

        let path = self.artifact_path(&document);
        let url = self.storage.put(bytes, &path).await?;
        self.record_artifact(document, &url).await?;
        tracing::info!(document_id = %document_id, artifact = %url, "Document rendered");
        Ok(RenderOutcome::Rendered(url))
    }

    async fn record_artifact(&self, mut document: BillingDocument, url: &str) -> Result<()> {
        for _ in 0..ARTIFACT_SAVE_ATTEMPTS {
            document.artifact = Some(url.to_string());
            match self.documents.save(document.clone()).await {
                Ok(_) => return Ok(()),
                Err(BillingError::Conflict(_)) => {
                    // a state transition landed meanwhile; reapply on the fresh copy
                    document = self.load(document.id).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(BillingError::Conflict(format!(
            "document {} kept changing while recording its artifact",
            document.id
        )))
    }

    async fn load(&self, document_id: DocumentId) -> Result<BillingDocument> {
        self.documents
            .get(document_id)
            .await?
            .ok_or_else(|| BillingError::not_found("document", document_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::domain::document::{DocumentEntry, DocumentKind};
    use crate::domain::money::{Currency, Money};
    use crate::domain::ports::DocumentStore;
    use crate::domain::subscription::{CustomerId, Period, SubscriptionId};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::InMemoryDocumentStore;
    use crate::infrastructure::lock::InMemoryLockStore;
    use crate::infrastructure::storage::InMemoryArtifactStorage;
    use crate::infrastructure::text_renderer::TextRenderer;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    async fn setup(issue: bool) -> (DocumentRenderer, Arc<InMemoryDocumentStore>, InMemoryArtifactStorage, DocumentId) {
        let start = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(end);
        let documents = Arc::new(InMemoryDocumentStore::new());
        let storage = InMemoryArtifactStorage::new();

        let mut doc = BillingDocument::draft(
            Some(SubscriptionId(1)),
            CustomerId(1),
            DocumentKind::Invoice,
            Period::new(start, end),
            Currency::new("EUR").unwrap(),
            end,
        );
        doc.add_entry(DocumentEntry {
            description: "Basic".to_string(),
            quantity: dec!(1),
            unit_price: Money::new(dec!(10)),
        })
        .unwrap();
        if issue {
            doc.issue(end, 5, 1).unwrap();
        }
        let id = doc.id;
        documents.insert(doc).await.unwrap();

        let locks = Arc::new(LockManager::new(
            Arc::new(InMemoryLockStore::new(Arc::new(clock))),
            &LockConfig::default(),
        ));
        let renderer = DocumentRenderer::new(
            Arc::new(BillingConfig::default()),
            locks,
            documents.clone(),
            Arc::new(TextRenderer::new()),
            Arc::new(storage.clone()),
        );
        (renderer, documents, storage, id)
    }

    #[tokio::test]
    async fn test_render_records_artifact_only() {
        let (renderer, documents, storage, id) = setup(true).await;
        let outcome = renderer.render(id, false).await.unwrap();
        let expected = format!("memory://documents/invoice/{id}.txt");
        assert_eq!(outcome, RenderOutcome::Rendered(expected.clone()));

        let stored = documents.get(id).await.unwrap().unwrap();
        assert_eq!(stored.artifact.as_deref(), Some(expected.as_str()));
        assert_eq!(stored.state(), DocumentState::Issued);
        assert_eq!(storage.len().await, 1);

        assert_eq!(
            renderer.render(id, false).await.unwrap(),
            RenderOutcome::AlreadyRendered(expected.clone())
        );
        assert_eq!(renderer.render(id, true).await.unwrap(), RenderOutcome::Rendered(expected));
    }

    #[tokio::test]
    async fn test_draft_is_not_rendered() {
        let (renderer, _, storage, id) = setup(false).await;
        assert!(matches!(
            renderer.render(id, false).await,
            Err(BillingError::ValidationError(_))
        ));
        assert_eq!(storage.len().await, 0);
    }
}
