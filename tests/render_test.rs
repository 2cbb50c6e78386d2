mod common;

use billrun::domain::document::DocumentState;
use billrun::domain::ports::{ArtifactStorage, EnqueueOutcome, JobQueue};
use billrun::domain::subscription::SubscriptionState;
use billrun::error::BillingError;
use common::{Harness, ScriptedProcessor, SlowRenderer};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_slow_render_is_retried_then_surfaced() {
    let h = Harness::with_renderer(
        common::config(),
        ScriptedProcessor::new([]),
        SlowRenderer::new(Duration::from_secs(61)),
    );
    h.seed_subscription(1, SubscriptionState::Active).await;

    h.engine.run_cycle().await.unwrap();
    let doc = &h.documents().await[0];
    // payment is independent of the artifact
    assert_eq!(doc.state(), DocumentState::Paid);
    assert!(doc.artifact.is_none());
    let outstanding = h.queue.outstanding().await;
    assert_eq!(outstanding.len(), 1);
    assert_eq!(outstanding[0].kind.job_type(), "render-document");
    assert_eq!(outstanding[0].attempts, 1);
    assert!(
        outstanding[0]
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("render"))
    );

    h.advance(Duration::from_secs(2));
    h.engine.workers().drain().await.unwrap();
    assert_eq!(h.queue.outstanding().await[0].attempts, 2);

    h.advance(Duration::from_secs(4));
    h.engine.workers().drain().await.unwrap();
    assert!(h.queue.outstanding().await.is_empty());
    let failed = h.queue.failed_jobs().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].kind.job_type(), "render-document");
    assert_eq!(h.renderer.calls(), 3);

    let doc = &h.documents().await[0];
    assert_eq!(doc.state(), DocumentState::Paid);
    assert!(doc.artifact.is_none());
    assert_eq!(h.storage.len().await, 0);

    // the failure stays surfaced: later sweeps do not render again
    let report = h.engine.scheduler().tick().await.unwrap();
    assert_eq!(report.render, 0);
    assert_eq!(report.surfaced, 1);
    let (report, handled) = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.enqueued(), 0);
    assert_eq!(handled, 0);
    assert_eq!(h.renderer.calls(), 3);

    // only an operator regenerate tries again
    let outcome = h.engine.commands().regenerate_document(doc.id).await.unwrap();
    assert!(matches!(outcome, EnqueueOutcome::Enqueued(_)));
    h.engine.workers().drain().await.unwrap();
    h.advance(Duration::from_secs(2));
    h.engine.workers().drain().await.unwrap();
    h.advance(Duration::from_secs(4));
    h.engine.workers().drain().await.unwrap();
    assert_eq!(h.renderer.calls(), 6);
    assert!(h.queue.is_empty().await);
    let failed = h.queue.failed_jobs().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempts, 2);
    assert_eq!(h.engine.scheduler().tick().await.unwrap().surfaced, 1);
}

#[tokio::test]
async fn test_regenerate_replaces_artifact_without_touching_state() {
    let h = Harness::new(common::config(), ScriptedProcessor::new([]));
    h.seed_subscription(1, SubscriptionState::Active).await;
    h.engine.run_cycle().await.unwrap();

    let before = h.documents().await.remove(0);
    let url = before.artifact.clone().unwrap();
    assert_eq!(url, format!("memory://documents/invoice/{}.txt", before.id));
    assert_eq!(h.renderer.calls(), 1);

    let outcome = h.engine.commands().regenerate_document(before.id).await.unwrap();
    assert!(matches!(outcome, EnqueueOutcome::Enqueued(_)));
    h.engine.workers().drain().await.unwrap();

    assert_eq!(h.renderer.calls(), 2);
    let after = h.documents().await.remove(0);
    assert_eq!(after.artifact.as_deref(), Some(url.as_str()));
    assert_eq!(after.state(), DocumentState::Paid);
    assert_eq!(after.number, before.number);
    assert_eq!(after.total(), before.total());
    assert_eq!(h.storage.len().await, 1);

    let path = url.trim_start_matches("memory://");
    let bytes = h.storage.get(path).await.unwrap();
    assert!(String::from_utf8(bytes).unwrap().contains("Pro"));
}

#[tokio::test]
async fn test_drafts_cannot_be_regenerated() {
    let mut config = common::config();
    config.documents.auto_issue = false;
    let h = Harness::new(config, ScriptedProcessor::new([]));
    h.seed_subscription(1, SubscriptionState::Active).await;
    h.engine.run_cycle().await.unwrap();

    let draft = &h.documents().await[0];
    assert_eq!(draft.state(), DocumentState::Draft);
    assert!(matches!(
        h.engine.commands().regenerate_document(draft.id).await,
        Err(BillingError::ValidationError(_))
    ));
    assert_eq!(h.renderer.calls(), 0);
}
