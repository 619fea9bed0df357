mod common;

use rust_decimal::Decimal;
use uuid::Uuid;

use common::{approver, harness, requester, role, single_step_policy, submit_request};
use decision_engine::context::ActorContext;
use decision_engine::errors::EngineError;
use decision_engine::models::decision::{DecisionStatus, StepStatus};
use decision_engine::models::history::DecisionAction;
use decision_engine::models::policy::{PolicyStep, TenantPolicyConfig};
use decision_engine::store::Page;

#[tokio::test]
async fn single_step_chain_approves_end_to_end() {
    let h = harness(single_step_policy());
    let rep = requester();

    let outcome = h
        .engine
        .submit(&h.ctx, &rep, submit_request(5000, "Discount"))
        .await
        .unwrap();
    assert!(outcome.is_created());
    let decision = outcome.decision().clone();
    assert_eq!(decision.status, DecisionStatus::Pending);
    assert_eq!(decision.total_steps, 1);

    let fm = approver("finance-manager");
    let approved = h
        .engine
        .approve(&h.ctx, &fm, decision.id, 1, Some("margin acceptable".into()))
        .await
        .unwrap();
    assert_eq!(approved.status, DecisionStatus::Approved);
    assert!(approved.completed_at.is_some());
    assert_eq!(approved.steps[0].status, StepStatus::Approved);

    // One history entry per accepted transition: submit + approve.
    let history = h.engine.history(&h.ctx, decision.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].action, DecisionAction::Submitted);
    assert_eq!(history[1].action, DecisionAction::Approved);

    // The audit ledger got rows on both commits.
    assert!(h.store.audit_entries().len() >= 2);
}

#[tokio::test]
async fn below_threshold_persists_nothing() {
    let h = harness(single_step_policy());
    let err = h
        .engine
        .submit(&h.ctx, &requester(), submit_request(500, "Discount"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoApplicableSteps));
    assert_eq!(h.store.decision_count(), 0);
}

#[tokio::test]
async fn duplicate_submission_returns_open_chain() {
    let h = harness(single_step_policy());
    let rep = requester();
    let mut request = submit_request(5000, "Discount");
    request.entity_id = Uuid::new_v4();

    let first = h.engine.submit(&h.ctx, &rep, request.clone()).await.unwrap();
    let second = h.engine.submit(&h.ctx, &rep, request).await.unwrap();

    assert!(first.is_created());
    assert!(!second.is_created());
    assert_eq!(first.decision().id, second.decision().id);
    assert_eq!(h.store.decision_count(), 1);
}

#[tokio::test]
async fn wrong_role_is_unauthorized() {
    let h = harness(single_step_policy());
    let decision = h
        .engine
        .submit(&h.ctx, &requester(), submit_request(5000, "Discount"))
        .await
        .unwrap()
        .decision()
        .clone();

    let outsider = approver("support-agent");
    let err = h
        .engine
        .approve(&h.ctx, &outsider, decision.id, 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err.kind, EngineError::Unauthorized));
    // Rejected transitions carry the unchanged snapshot.
    assert_eq!(err.decision.unwrap().status, DecisionStatus::Pending);
}

#[tokio::test]
async fn acting_on_wrong_step_is_a_mismatch() {
    let h = harness(single_step_policy());
    let decision = h
        .engine
        .submit(&h.ctx, &requester(), submit_request(5000, "Discount"))
        .await
        .unwrap()
        .decision()
        .clone();

    let fm = approver("finance-manager");
    let err = h
        .engine
        .approve(&h.ctx, &fm, decision.id, 2, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind,
        EngineError::StepMismatch {
            requested: 2,
            current: 1
        }
    ));
}

#[tokio::test]
async fn terminal_decision_rejects_further_actions() {
    let h = harness(single_step_policy());
    let decision = h
        .engine
        .submit(&h.ctx, &requester(), submit_request(5000, "Discount"))
        .await
        .unwrap()
        .decision()
        .clone();

    let fm = approver("finance-manager");
    h.engine.approve(&h.ctx, &fm, decision.id, 1, None).await.unwrap();

    let err = h
        .engine
        .reject(&h.ctx, &fm, decision.id, 1, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind,
        EngineError::AlreadyTerminal {
            status: DecisionStatus::Approved
        }
    ));
}

#[tokio::test]
async fn rejection_skips_remaining_steps() {
    let policy = TenantPolicyConfig {
        steps: vec![
            PolicyStep {
                order: 1,
                approver_role: "team-lead".into(),
                amount_threshold: None,
                purpose: None,
            },
            PolicyStep {
                order: 2,
                approver_role: "finance-manager".into(),
                amount_threshold: None,
                purpose: None,
            },
        ],
        ..Default::default()
    };
    let h = harness(policy);
    let decision = h
        .engine
        .submit(&h.ctx, &requester(), submit_request(5000, "Close"))
        .await
        .unwrap()
        .decision()
        .clone();

    let lead = approver("team-lead");
    let rejected = h
        .engine
        .reject(&h.ctx, &lead, decision.id, 1, Some("terms not viable".into()))
        .await
        .unwrap();

    assert_eq!(rejected.status, DecisionStatus::Rejected);
    assert_eq!(rejected.steps[0].status, StepStatus::Rejected);
    assert_eq!(rejected.steps[1].status, StepStatus::Skipped);
}

#[tokio::test]
async fn multi_step_chain_advances_in_order() {
    let policy = TenantPolicyConfig {
        steps: vec![
            PolicyStep {
                order: 1,
                approver_role: "team-lead".into(),
                amount_threshold: None,
                purpose: None,
            },
            PolicyStep {
                order: 2,
                approver_role: "finance-manager".into(),
                amount_threshold: None,
                purpose: None,
            },
        ],
        ..Default::default()
    };
    let h = harness(policy);
    let decision = h
        .engine
        .submit(&h.ctx, &requester(), submit_request(5000, "Close"))
        .await
        .unwrap()
        .decision()
        .clone();
    assert_eq!(decision.total_steps, 2);
    assert_eq!(decision.current_step_order, 1);

    let lead = approver("team-lead");
    let advanced = h
        .engine
        .approve(&h.ctx, &lead, decision.id, 1, None)
        .await
        .unwrap();
    assert_eq!(advanced.status, DecisionStatus::Pending);
    assert_eq!(advanced.current_step_order, 2);

    // The finance manager cannot jump in before their step... and the lead
    // cannot act twice.
    let err = h
        .engine
        .approve(&h.ctx, &lead, decision.id, 2, None)
        .await
        .unwrap_err();
    assert!(matches!(err.kind, EngineError::Unauthorized));

    let fm = approver("finance-manager");
    let done = h
        .engine
        .approve(&h.ctx, &fm, decision.id, 2, None)
        .await
        .unwrap();
    assert_eq!(done.status, DecisionStatus::Approved);
}

#[tokio::test]
async fn delegation_moves_authority_to_the_assignee() {
    let h = harness(single_step_policy());
    let decision = h
        .engine
        .submit(&h.ctx, &requester(), submit_request(5000, "Discount"))
        .await
        .unwrap()
        .decision()
        .clone();

    let fm = approver("finance-manager");
    let delegate_id = Uuid::new_v4();
    let delegated = h
        .engine
        .delegate(
            &h.ctx,
            &fm,
            decision.id,
            1,
            delegate_id,
            "Priya Nair".into(),
            Some("out of office".into()),
        )
        .await
        .unwrap();
    assert_eq!(delegated.status, DecisionStatus::Pending);
    assert_eq!(delegated.current_assignee(), Some(delegate_id));

    // The original role holder lost authority to the explicit assignee.
    let err = h
        .engine
        .approve(&h.ctx, &fm, decision.id, 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err.kind, EngineError::Unauthorized));

    let delegate = ActorContext::user(delegate_id, "Priya Nair", vec![]);
    let approved = h
        .engine
        .approve(&h.ctx, &delegate, decision.id, 1, None)
        .await
        .unwrap();
    assert_eq!(approved.status, DecisionStatus::Approved);

    let history = h.engine.history(&h.ctx, decision.id).await.unwrap();
    let actions: Vec<DecisionAction> = history.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            DecisionAction::Submitted,
            DecisionAction::Delegated,
            DecisionAction::Approved
        ]
    );
}

#[tokio::test]
async fn cancel_is_limited_to_requester_and_admin() {
    let h = harness(single_step_policy());
    let rep = requester();
    let decision = h
        .engine
        .submit(&h.ctx, &rep, submit_request(5000, "Discount"))
        .await
        .unwrap()
        .decision()
        .clone();

    let stranger = approver("finance-manager");
    let err = h
        .engine
        .cancel(&h.ctx, &stranger, decision.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err.kind, EngineError::Unauthorized));

    let cancelled = h
        .engine
        .cancel(&h.ctx, &rep, decision.id, Some("deal fell through".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, DecisionStatus::Cancelled);
    assert_eq!(cancelled.steps[0].status, StepStatus::Skipped);

    // Admin can cancel someone else's pending decision.
    let other = h
        .engine
        .submit(&h.ctx, &rep, submit_request(6000, "Close"))
        .await
        .unwrap()
        .decision()
        .clone();
    let admin = ActorContext::user(Uuid::new_v4(), "Ops Admin", vec![role("administrator")]);
    let cancelled = h.engine.cancel(&h.ctx, &admin, other.id, None).await.unwrap();
    assert_eq!(cancelled.status, DecisionStatus::Cancelled);
}

#[tokio::test]
async fn cross_tenant_access_reads_as_not_found() {
    let h = harness(single_step_policy());
    let decision = h
        .engine
        .submit(&h.ctx, &requester(), submit_request(5000, "Discount"))
        .await
        .unwrap()
        .decision()
        .clone();

    let other_tenant = decision_engine::context::TenantContext::new(Uuid::new_v4());
    let err = h.engine.get(&other_tenant, decision.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound));
}

#[tokio::test]
async fn lists_are_scoped_to_the_caller() {
    let h = harness(single_step_policy());
    let rep = requester();
    let decision = h
        .engine
        .submit(&h.ctx, &rep, submit_request(5000, "Discount"))
        .await
        .unwrap()
        .decision()
        .clone();

    let rep_id = rep.user_id.unwrap();
    let mine = h
        .engine
        .list_for_requester(&h.ctx, rep_id, Page::default())
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, decision.id);

    let nobody = h
        .engine
        .list_for_requester(&h.ctx, Uuid::new_v4(), Page::default())
        .await
        .unwrap();
    assert!(nobody.is_empty());
}

#[tokio::test]
async fn high_value_request_is_flagged_high_risk() {
    let h = harness(single_step_policy());
    let decision = h
        .engine
        .submit(&h.ctx, &requester(), submit_request(150_000, "Close"))
        .await
        .unwrap()
        .decision()
        .clone();

    // 150k >= 2x the 1k threshold and >= the 100k impact band.
    assert_eq!(
        decision.risk_level,
        decision_engine::models::decision::RiskLevel::High
    );
    assert_eq!(decision.business_impact.as_deref(), Some("high impact"));
    assert_eq!(decision.amount, Decimal::from(150_000u32));
}

#[tokio::test]
async fn advisor_summary_is_attached_to_a_live_decision() {
    let h = harness(single_step_policy());
    let decision = h
        .engine
        .submit(&h.ctx, &requester(), submit_request(5000, "Discount"))
        .await
        .unwrap()
        .decision()
        .clone();

    let summary = h.engine.summarize(&h.ctx, decision.id).await.unwrap();
    assert_eq!(summary.decision_id, decision.id);
    assert_eq!(summary.disclaimer, decision_engine::advisor::DISCLAIMER);
    assert!(!summary.missing_evidence.is_empty());
    assert!(summary.summary.contains("Discount"));
}
