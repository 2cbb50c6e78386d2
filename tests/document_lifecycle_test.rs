mod common;

use billrun::application::generator::Generated;
use billrun::domain::document::DocumentState;
use billrun::domain::subscription::{Period, SubscriptionId, SubscriptionState};
use billrun::error::BillingError;
use common::{Harness, ScriptedProcessor, period_end, period_start};

fn september() -> Period {
    Period::new(period_start(), period_end())
}

#[tokio::test]
async fn test_illegal_transitions_leave_document_unchanged() {
    let h = Harness::new(common::config(), ScriptedProcessor::new([]));
    h.seed_subscription(1, SubscriptionState::Active).await;
    let generator = h.engine.generator();

    let Generated::Created(draft) = generator.generate(SubscriptionId(1), september()).await.unwrap() else {
        panic!("expected a new draft");
    };
    let err = generator.mark_paid(draft.id).await.unwrap_err();
    assert!(matches!(err, BillingError::InvalidTransition { entity: "document", .. }));
    let stored = h.backends().documents.get(draft.id).await.unwrap().unwrap();
    assert_eq!(stored, draft);

    let issued = generator.issue(draft.id).await.unwrap();
    assert_eq!(issued.state(), DocumentState::Issued);
    // replaying issue keeps the number and due date
    let again = generator.issue(draft.id).await.unwrap();
    assert_eq!(again.number, issued.number);
    assert_eq!(again.due_date, issued.due_date);
    assert_eq!(again.version, issued.version);

    let paid = generator.mark_paid(draft.id).await.unwrap();
    assert_eq!(paid.state(), DocumentState::Paid);
    assert!(matches!(
        generator.cancel(draft.id).await,
        Err(BillingError::InvalidTransition { .. })
    ));
    assert_eq!(generator.issue(draft.id).await.unwrap(), paid);
    let stored = h.backends().documents.get(draft.id).await.unwrap().unwrap();
    assert_eq!(stored, paid);
}

#[tokio::test]
async fn test_canceled_draft_is_not_issued() {
    let h = Harness::new(common::config(), ScriptedProcessor::new([]));
    h.seed_subscription(1, SubscriptionState::Active).await;
    let generator = h.engine.generator();

    let created = generator.generate(SubscriptionId(1), september()).await.unwrap();
    let draft = created.document().unwrap().clone();
    let canceled = generator.cancel(draft.id).await.unwrap();
    assert_eq!(canceled.state(), DocumentState::Canceled);
    assert!(canceled.canceled_at.is_some());

    assert!(matches!(
        generator.issue(draft.id).await,
        Err(BillingError::InvalidTransition { .. })
    ));
    // the period stays billed by the canceled document
    assert!(matches!(
        generator.generate(SubscriptionId(1), september()).await.unwrap(),
        Generated::Existing(doc) if doc.id == draft.id
    ));
}

#[tokio::test]
async fn test_cancel_subscription_cancels_drafts_only() {
    let mut config = common::config();
    config.documents.auto_issue = false;
    let h = Harness::new(config, ScriptedProcessor::new([]));
    h.seed_subscription(1, SubscriptionState::Active).await;
    h.seed_subscription(2, SubscriptionState::Active).await;
    h.engine.run_cycle().await.unwrap();

    let docs = h.documents().await;
    assert_eq!(docs.len(), 2);
    let issued = h.engine.generator().issue(docs[1].id).await.unwrap();

    let canceled = h.engine.commands().cancel_subscription(SubscriptionId(1)).await.unwrap();
    assert_eq!(canceled, vec![docs[0].id]);
    let canceled = h.engine.commands().cancel_subscription(SubscriptionId(2)).await.unwrap();
    assert!(canceled.is_empty());

    let docs = h.documents().await;
    assert_eq!(docs[0].state(), DocumentState::Canceled);
    assert_eq!(docs[1].state(), DocumentState::Issued);
    assert_eq!(docs[1].number, issued.number);

    let subscription = h.backends().subscriptions.get(SubscriptionId(1)).await.unwrap().unwrap();
    assert_eq!(subscription.state, SubscriptionState::Canceled);

    // canceling again is harmless
    let canceled = h.engine.commands().cancel_subscription(SubscriptionId(1)).await.unwrap();
    assert!(canceled.is_empty());
}

#[tokio::test]
async fn test_generation_skips_subscription_canceled_after_scheduling() {
    let h = Harness::new(common::config(), ScriptedProcessor::new([]));
    h.seed_subscription(1, SubscriptionState::Active).await;

    let report = h.engine.scheduler().tick().await.unwrap();
    assert_eq!(report.generate, 1);
    h.engine.commands().cancel_subscription(SubscriptionId(1)).await.unwrap();

    h.engine.workers().drain().await.unwrap();
    assert!(h.documents().await.is_empty());
    assert!(matches!(
        h.engine.generator().generate(SubscriptionId(1), september()).await.unwrap(),
        Generated::Skipped
    ));
}

#[tokio::test]
async fn test_mark_overdue_requires_past_due_date() {
    let h = Harness::new(common::config(), ScriptedProcessor::new([]));
    h.seed_subscription(1, SubscriptionState::Active).await;
    let generator = h.engine.generator();
    let draft = generator
        .generate(SubscriptionId(1), september())
        .await
        .unwrap()
        .document()
        .unwrap()
        .clone();
    generator.issue(draft.id).await.unwrap();

    assert!(!generator.mark_overdue(draft.id).await.unwrap());
    h.advance(std::time::Duration::from_secs(5 * 24 * 60 * 60 + 1));
    assert!(generator.mark_overdue(draft.id).await.unwrap());
    let doc = h.backends().documents.get(draft.id).await.unwrap().unwrap();
    assert_eq!(doc.state(), DocumentState::Overdue);

    // overdue documents have no way back to paid
    assert!(matches!(
        generator.mark_paid(draft.id).await,
        Err(BillingError::InvalidTransition { .. })
    ));
}
