#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use decision_engine::config::SlaSettings;
use decision_engine::context::{ActorContext, RoleId, TenantContext};
use decision_engine::engine::{DecisionEngine, EngineConfig, SubmitRequest};
use decision_engine::models::policy::TenantPolicyConfig;
use decision_engine::notification::{ApprovalQueue, NoopPublisher, NotificationFanout};
use decision_engine::store::memory::MemoryStore;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub engine: DecisionEngine,
    pub ctx: TenantContext,
}

pub fn harness(policy: TenantPolicyConfig) -> Harness {
    harness_with_sla(policy, SlaSettings::default())
}

pub fn harness_with_sla(policy: TenantPolicyConfig, sla: SlaSettings) -> Harness {
    harness_full(policy, sla, ApprovalQueue::disabled())
}

pub fn harness_with_queue(policy: TenantPolicyConfig, queue: ApprovalQueue) -> Harness {
    harness_full(policy, SlaSettings::default(), queue)
}

fn harness_full(policy: TenantPolicyConfig, sla: SlaSettings, queue: ApprovalQueue) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let ctx = TenantContext::new(Uuid::new_v4());
    store.set_policy(ctx.tenant_id, policy);

    let fanout = NotificationFanout::new(Arc::new(NoopPublisher), queue);
    let engine = DecisionEngine::new(
        store.clone(),
        fanout,
        EngineConfig {
            sla,
            admin_role: role("administrator"),
        },
    );
    Harness { store, engine, ctx }
}

pub fn role(name: &str) -> RoleId {
    RoleId::new(name).expect("non-blank role")
}

/// Default single-approver policy: finance-manager signs anything >= 1000.
pub fn single_step_policy() -> TenantPolicyConfig {
    TenantPolicyConfig {
        approver_role: RoleId::new("finance-manager"),
        amount_threshold: Some(Decimal::from(1000u32)),
        ..Default::default()
    }
}

pub fn submit_request(amount: u32, purpose: &str) -> SubmitRequest {
    SubmitRequest {
        decision_type: "approval".into(),
        workflow_type: "opportunity".into(),
        entity_type: "opportunity".into(),
        entity_id: Uuid::new_v4(),
        entity_name: Some("Acme renewal".into()),
        purpose: purpose.into(),
        amount: Decimal::from(amount),
        currency: "USD".into(),
        payload: serde_json::json!({ "stage": "negotiation" }),
    }
}

pub fn requester() -> ActorContext {
    ActorContext::user(Uuid::new_v4(), "Jordan Reyes", vec![role("sales-rep")])
}

pub fn approver(role_name: &str) -> ActorContext {
    ActorContext::user(Uuid::new_v4(), "Sam Okafor", vec![role(role_name)])
}
