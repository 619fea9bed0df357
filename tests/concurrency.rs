mod common;

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use common::{approver, harness, requester, single_step_policy, submit_request};
use decision_engine::errors::EngineError;
use decision_engine::models::audit::AuditEntry;
use decision_engine::models::decision::DecisionStatus;
use decision_engine::models::history::{DecisionAction, DecisionHistoryEntry};
use decision_engine::store::{DecisionStore, StoreError};

#[tokio::test]
async fn stale_version_commit_is_refused() {
    let h = harness(single_step_policy());
    let decision = h
        .engine
        .submit(&h.ctx, &requester(), submit_request(5000, "Discount"))
        .await
        .unwrap()
        .decision()
        .clone();

    // First writer wins with the version it read.
    let mut first = h.store.get(&h.ctx, decision.id).await.unwrap();
    first.status = DecisionStatus::Approved;
    first.completed_at = Some(Utc::now());
    let entry = DecisionHistoryEntry::record(
        &first,
        DecisionAction::Approved,
        Some(&approver("finance-manager")),
        None,
        Utc::now(),
    );
    h.store
        .commit_transition(&h.ctx, &first, &entry, &[])
        .await
        .unwrap();

    // A second writer still holding the old version loses.
    let mut stale = decision.clone();
    stale.status = DecisionStatus::Rejected;
    let entry = DecisionHistoryEntry::record(&stale, DecisionAction::Rejected, None, None, Utc::now());
    let audit: Vec<AuditEntry> = Vec::new();
    let err = h
        .store
        .commit_transition(&h.ctx, &stale, &entry, &audit)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict));

    // Committed state is the first writer's, one version higher.
    let current = h.store.get(&h.ctx, decision.id).await.unwrap();
    assert_eq!(current.status, DecisionStatus::Approved);
    assert_eq!(current.version, decision.version + 1);
}

#[tokio::test]
async fn racing_reviewers_produce_exactly_one_outcome() {
    let h = Arc::new(harness(single_step_policy()));
    let decision = h
        .engine
        .submit(&h.ctx, &requester(), submit_request(5000, "Discount"))
        .await
        .unwrap()
        .decision()
        .clone();

    let approve_h = h.clone();
    let approve_id = decision.id;
    let approve = tokio::spawn(async move {
        let fm = approver("finance-manager");
        approve_h
            .engine
            .approve(&approve_h.ctx, &fm, approve_id, 1, None)
            .await
    });
    let reject_h = h.clone();
    let reject_id = decision.id;
    let reject = tokio::spawn(async move {
        let fm = approver("finance-manager");
        reject_h
            .engine
            .reject(&reject_h.ctx, &fm, reject_id, 1, None)
            .await
    });

    let (a, r) = (approve.await.unwrap(), reject.await.unwrap());
    let successes = [a.is_ok(), r.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1, "exactly one transition must win");

    // The loser saw either the version race or the terminal state.
    let loser = if a.is_ok() { r.unwrap_err() } else { a.unwrap_err() };
    assert!(matches!(
        loser.kind,
        EngineError::ConcurrentModification | EngineError::AlreadyTerminal { .. }
    ));

    // History holds exactly submit + the winning transition.
    let history = h.engine.history(&h.ctx, decision.id).await.unwrap();
    assert_eq!(history.len(), 2);
    let current = h.engine.get(&h.ctx, decision.id).await.unwrap();
    assert!(current.is_terminal());
}

#[tokio::test]
async fn second_open_chain_for_same_entity_is_refused() {
    let h = harness(single_step_policy());
    let decision = h
        .engine
        .submit(&h.ctx, &requester(), submit_request(5000, "Discount"))
        .await
        .unwrap()
        .decision()
        .clone();

    // A racing submission that slipped past the duplicate read hits the
    // store-level guard instead of opening a second chain.
    let mut dup = decision.clone();
    dup.id = Uuid::new_v4();
    for step in &mut dup.steps {
        step.decision_id = dup.id;
    }
    let entry =
        DecisionHistoryEntry::record(&dup, DecisionAction::Submitted, None, None, Utc::now());
    let err = h.store.create(&h.ctx, &dup, &entry, &[]).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyOpen));
    assert_eq!(h.store.decision_count(), 1);
}

#[tokio::test]
async fn history_keeps_commit_order_for_identical_timestamps() {
    let h = harness(single_step_policy());
    let decision = h
        .engine
        .submit(&h.ctx, &requester(), submit_request(5000, "Discount"))
        .await
        .unwrap()
        .decision()
        .clone();

    // Two commits stamped with the same wall-clock instant must still read
    // back in commit order.
    let now = Utc::now();
    let first = h.store.get(&h.ctx, decision.id).await.unwrap();
    let entry =
        DecisionHistoryEntry::record(&first, DecisionAction::Delegated, None, None, now);
    h.store
        .commit_transition(&h.ctx, &first, &entry, &[])
        .await
        .unwrap();

    let mut second = h.store.get(&h.ctx, decision.id).await.unwrap();
    second.status = DecisionStatus::Approved;
    second.completed_at = Some(now);
    let entry =
        DecisionHistoryEntry::record(&second, DecisionAction::Approved, None, None, now);
    h.store
        .commit_transition(&h.ctx, &second, &entry, &[])
        .await
        .unwrap();

    let actions: Vec<DecisionAction> = h
        .store
        .history(&h.ctx, decision.id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            DecisionAction::Submitted,
            DecisionAction::Delegated,
            DecisionAction::Approved
        ]
    );
}
