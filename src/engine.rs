//! The decision state machine. Every mutation goes through here: submit,
//! approve, reject, delegate, cancel, escalate. Each accepted transition
//! commits the aggregate, exactly one history entry and the audit rows in one
//! atomic store unit, then fans out notifications best-effort.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::advisor;
use crate::config::SlaSettings;
use crate::context::{ActorContext, RoleId, TenantContext};
use crate::errors::{EngineError, TransitionError};
use crate::models::advisor::AdvisorSummary;
use crate::models::audit::AuditEntry;
use crate::models::decision::{Decision, DecisionStatus, DecisionStep, StepStatus};
use crate::models::history::{DecisionAction, DecisionHistoryEntry};
use crate::models::policy::TenantPolicyConfig;
use crate::notification::NotificationFanout;
use crate::policy::{derive_metadata, sla_window, PolicyResolver};
use crate::store::{DecisionStore, Page, StoreError};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sla: SlaSettings,
    /// Role allowed to cancel any decision and force escalations.
    pub admin_role: RoleId,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sla: SlaSettings::default(),
            admin_role: RoleId::new("administrator").expect("non-blank literal"),
        }
    }
}

/// A new approval request.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub decision_type: String,
    pub workflow_type: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub entity_name: Option<String>,
    pub purpose: String,
    pub amount: rust_decimal::Decimal,
    pub currency: String,
    pub payload: serde_json::Value,
}

/// Result of a submission: either a freshly created chain or the still-open
/// chain a duplicate request folded into.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Created(Decision),
    Existing(Decision),
}

impl SubmitOutcome {
    pub fn decision(&self) -> &Decision {
        match self {
            SubmitOutcome::Created(d) | SubmitOutcome::Existing(d) => d,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, SubmitOutcome::Created(_))
    }
}

pub struct DecisionEngine {
    store: Arc<dyn DecisionStore>,
    fanout: NotificationFanout,
    config: EngineConfig,
}

impl DecisionEngine {
    pub fn new(
        store: Arc<dyn DecisionStore>,
        fanout: NotificationFanout,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            fanout,
            config,
        }
    }

    /// Open an approval chain for an entity. Validates before persisting:
    /// nothing is written when policy resolution fails or yields no steps.
    /// A still-pending chain for the same entity and purpose is returned
    /// as-is instead of opening a duplicate.
    pub async fn submit(
        &self,
        ctx: &TenantContext,
        actor: &ActorContext,
        request: SubmitRequest,
    ) -> Result<SubmitOutcome, EngineError> {
        let policy = self.store.load_policy(ctx).await?;
        let template = PolicyResolver::resolve(request.amount, &request.purpose, &policy)?;
        if template.is_empty() {
            return Err(EngineError::NoApplicableSteps);
        }

        if let Some(existing) = self
            .store
            .find_open(ctx, &request.entity_type, request.entity_id, &request.purpose)
            .await?
        {
            info!(
                decision_id = %existing.id,
                entity_id = %request.entity_id,
                "duplicate submission folded into open chain"
            );
            return Ok(SubmitOutcome::Existing(existing));
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let total_steps = template.len() as i32;

        let steps: Vec<DecisionStep> = template
            .iter()
            .map(|t| DecisionStep {
                decision_id: id,
                step_order: t.order,
                step_type: "approval".to_string(),
                approver_role: t.approver_role.clone(),
                assignee_user_id: None,
                assignee_name: None,
                due_at: Some(now + sla_window(&request.purpose, t.order, &self.config.sla)),
                status: StepStatus::Pending,
                decided_at: None,
                notes: None,
            })
            .collect();

        let first_due = steps[0].due_at;
        let meta = derive_metadata(
            &request.purpose,
            request.amount,
            policy.amount_threshold,
            first_due,
            now,
            1,
            total_steps,
            &self.config.sla,
        );

        let decision = Decision {
            id,
            tenant_id: ctx.tenant_id,
            version: 0,
            decision_type: request.decision_type,
            workflow_type: request.workflow_type,
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            entity_name: request.entity_name,
            purpose: request.purpose,
            amount: request.amount,
            currency: request.currency,
            status: DecisionStatus::Pending,
            priority: meta.priority,
            risk_level: meta.risk_level,
            sla_status: meta.sla_status,
            sla_due_at: first_due,
            requested_by: actor.user_id,
            requested_by_name: Some(actor.display_name.clone()),
            current_step_order: 1,
            total_steps,
            policy_snapshot: serde_json::to_value(&policy)
                .map_err(|e| EngineError::Persistence(e.into()))?,
            payload: request.payload,
            policy_reason: Some(meta.policy_reason),
            business_impact: Some(meta.business_impact),
            requested_at: now,
            completed_at: None,
            steps,
        };

        let history = DecisionHistoryEntry::record(
            &decision,
            DecisionAction::Submitted,
            Some(actor),
            None,
            now,
        );
        let audit = vec![AuditEntry::new(
            &decision.entity_type,
            decision.entity_id,
            "decision.submitted",
            now,
        )
        .field_change("status", None, Some(decision.status.to_string()))
        .by(actor.user_id, Some(actor.display_name.clone()))];

        match self.store.create(ctx, &decision, &history, &audit).await {
            Ok(()) => {}
            // Lost a race with a simultaneous submission; fold into the chain
            // that won.
            Err(StoreError::AlreadyOpen) => {
                if let Some(existing) = self
                    .store
                    .find_open(ctx, &decision.entity_type, decision.entity_id, &decision.purpose)
                    .await?
                {
                    info!(
                        decision_id = %existing.id,
                        entity_id = %decision.entity_id,
                        "racing submission folded into open chain"
                    );
                    return Ok(SubmitOutcome::Existing(existing));
                }
                return Err(EngineError::ConcurrentModification);
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            decision_id = %decision.id,
            tenant_id = %ctx.tenant_id,
            steps = total_steps,
            purpose = %decision.purpose,
            "decision submitted"
        );
        self.fanout.on_transition(&decision, &history).await;
        Ok(SubmitOutcome::Created(decision))
    }

    /// Approve the current step. Advances to the next step, or completes the
    /// decision when this was the last one.
    pub async fn approve(
        &self,
        ctx: &TenantContext,
        actor: &ActorContext,
        decision_id: Uuid,
        step_order: i32,
        note: Option<String>,
    ) -> Result<Decision, TransitionError> {
        let mut decision = self.load_actionable(ctx, decision_id, step_order, actor).await?;
        let now = Utc::now();

        {
            let step = decision
                .current_step_mut()
                .ok_or_else(|| TransitionError::new(EngineError::NotFound))?;
            step.status = StepStatus::Approved;
            step.decided_at = Some(now);
            step.notes = note.clone();
        }

        let mut audit = vec![AuditEntry::new(
            &decision.entity_type,
            decision.entity_id,
            "decision.step_approved",
            now,
        )
        .field_change("step", Some(step_order.to_string()), Some("approved".into()))
        .by(actor.user_id, Some(actor.display_name.clone()))];

        if decision.current_step_order < decision.total_steps {
            decision.current_step_order += 1;
            self.refresh_metadata(&mut decision, now);
        } else {
            decision.status = DecisionStatus::Approved;
            decision.completed_at = Some(now);
            audit.push(
                AuditEntry::new(&decision.entity_type, decision.entity_id, "decision.approved", now)
                    .field_change(
                        "status",
                        Some(DecisionStatus::Pending.to_string()),
                        Some(DecisionStatus::Approved.to_string()),
                    )
                    .by(actor.user_id, Some(actor.display_name.clone())),
            );
        }

        self.commit(ctx, decision, DecisionAction::Approved, Some(actor), note, now, audit)
            .await
    }

    /// Reject the current step, which rejects the whole decision and skips
    /// every later step.
    pub async fn reject(
        &self,
        ctx: &TenantContext,
        actor: &ActorContext,
        decision_id: Uuid,
        step_order: i32,
        note: Option<String>,
    ) -> Result<Decision, TransitionError> {
        let mut decision = self.load_actionable(ctx, decision_id, step_order, actor).await?;
        let now = Utc::now();

        {
            let step = decision
                .current_step_mut()
                .ok_or_else(|| TransitionError::new(EngineError::NotFound))?;
            step.status = StepStatus::Rejected;
            step.decided_at = Some(now);
            step.notes = note.clone();
        }
        skip_later_steps(&mut decision, step_order);

        decision.status = DecisionStatus::Rejected;
        decision.completed_at = Some(now);

        let audit = vec![AuditEntry::new(
            &decision.entity_type,
            decision.entity_id,
            "decision.rejected",
            now,
        )
        .field_change(
            "status",
            Some(DecisionStatus::Pending.to_string()),
            Some(DecisionStatus::Rejected.to_string()),
        )
        .by(actor.user_id, Some(actor.display_name.clone()))];

        self.commit(ctx, decision, DecisionAction::Rejected, Some(actor), note, now, audit)
            .await
    }

    /// Hand the current step to a specific user. The step stays pending; the
    /// explicit assignee replaces the role as the authorized identity.
    pub async fn delegate(
        &self,
        ctx: &TenantContext,
        actor: &ActorContext,
        decision_id: Uuid,
        step_order: i32,
        to_user: Uuid,
        to_name: String,
        note: Option<String>,
    ) -> Result<Decision, TransitionError> {
        let mut decision = self.load_actionable(ctx, decision_id, step_order, actor).await?;
        let now = Utc::now();

        let old_assignee;
        {
            let step = decision
                .current_step_mut()
                .ok_or_else(|| TransitionError::new(EngineError::NotFound))?;
            old_assignee = step.assignee_name.clone();
            step.assignee_user_id = Some(to_user);
            step.assignee_name = Some(to_name.clone());
        }

        let audit = vec![AuditEntry::new(
            &decision.entity_type,
            decision.entity_id,
            "decision.delegated",
            now,
        )
        .field_change("assignee", old_assignee, Some(to_name))
        .by(actor.user_id, Some(actor.display_name.clone()))];

        self.commit(ctx, decision, DecisionAction::Delegated, Some(actor), note, now, audit)
            .await
    }

    /// Withdraw a pending decision. Allowed for the original requester and
    /// for holders of the admin role.
    pub async fn cancel(
        &self,
        ctx: &TenantContext,
        actor: &ActorContext,
        decision_id: Uuid,
        note: Option<String>,
    ) -> Result<Decision, TransitionError> {
        let mut decision = self
            .store
            .get(ctx, decision_id)
            .await
            .map_err(|e| TransitionError::new(e.into()))?;

        if decision.is_terminal() {
            let status = decision.status;
            return Err(TransitionError::rejected(
                EngineError::AlreadyTerminal { status },
                decision,
            ));
        }

        let is_requester = decision
            .requested_by
            .map_or(false, |requester| actor.is_user(requester));
        if !is_requester && !actor.has_role(&self.config.admin_role) {
            return Err(TransitionError::rejected(EngineError::Unauthorized, decision));
        }

        let now = Utc::now();
        let current = decision.current_step_order;
        skip_later_steps(&mut decision, current - 1);
        decision.status = DecisionStatus::Cancelled;
        decision.completed_at = Some(now);

        let audit = vec![AuditEntry::new(
            &decision.entity_type,
            decision.entity_id,
            "decision.cancelled",
            now,
        )
        .field_change(
            "status",
            Some(DecisionStatus::Pending.to_string()),
            Some(DecisionStatus::Cancelled.to_string()),
        )
        .by(actor.user_id, Some(actor.display_name.clone()))];

        self.commit(ctx, decision, DecisionAction::Cancelled, Some(actor), note, now, audit)
            .await
    }

    /// Escalate an overdue current step: reassign it to the tenant's fallback
    /// role, clear any explicit assignee, extend the due time and mark the
    /// SLA breached. The decision stays pending.
    ///
    /// `actor` is `None` for the scheduler; a user actor must hold the admin
    /// role and may pass `force` to escalate a step that is not yet overdue.
    pub async fn escalate(
        &self,
        ctx: &TenantContext,
        actor: Option<&ActorContext>,
        decision_id: Uuid,
        force: bool,
    ) -> Result<Decision, TransitionError> {
        let mut decision = self
            .store
            .get(ctx, decision_id)
            .await
            .map_err(|e| TransitionError::new(e.into()))?;

        if let Some(user) = actor {
            if !user.has_role(&self.config.admin_role) {
                return Err(TransitionError::rejected(EngineError::Unauthorized, decision));
            }
        }

        if decision.is_terminal() {
            let status = decision.status;
            return Err(TransitionError::rejected(
                EngineError::AlreadyTerminal { status },
                decision,
            ));
        }

        let policy = self
            .store
            .load_policy(ctx)
            .await
            .map_err(|e| TransitionError::new(e.into()))?;
        if !policy.escalation.enabled && !force {
            return Err(TransitionError::rejected(
                EngineError::NothingToEscalate,
                decision,
            ));
        }

        let now = Utc::now();
        let overdue = decision
            .current_step()
            .and_then(|s| s.due_at)
            .map_or(false, |due| now > due);
        if !overdue && !force {
            return Err(TransitionError::rejected(
                EngineError::NothingToEscalate,
                decision,
            ));
        }

        let extended_due = now + chrono::Duration::hours(policy.escalation.extend_hours);
        let old_role;
        let new_role;
        {
            let step = decision
                .current_step_mut()
                .ok_or_else(|| TransitionError::new(EngineError::NotFound))?;
            old_role = step.approver_role.clone();
            if let Some(fallback) = &policy.escalation.fallback_role {
                step.approver_role = fallback.clone();
            }
            new_role = step.approver_role.clone();
            step.assignee_user_id = None;
            step.assignee_name = None;
            step.due_at = Some(extended_due);
        }

        decision.sla_status = crate::models::decision::SlaStatus::Breached;
        decision.priority = crate::models::decision::Priority::Critical;
        decision.risk_level = crate::models::decision::RiskLevel::High;
        decision.sla_due_at = Some(extended_due);
        decision.policy_reason = Some(format!(
            "Approval window missed; step {} reassigned to {}.",
            decision.current_step_order, new_role
        ));

        let audit = vec![AuditEntry::new(
            &decision.entity_type,
            decision.entity_id,
            "decision.escalated",
            now,
        )
        .field_change(
            "approver_role",
            Some(old_role.to_string()),
            Some(new_role.to_string()),
        )
        .by(
            actor.and_then(|a| a.user_id),
            actor.map(|a| a.display_name.clone()),
        )];

        let note = Some(format!("SLA breached; reassigned to {new_role}."));
        self.commit(ctx, decision, DecisionAction::Escalated, actor, note, now, audit)
            .await
    }

    /// One scheduler pass: escalate every decision whose current step is
    /// overdue. Failures are isolated per decision; losing a version race to
    /// a concurrent reviewer is expected and only logged.
    pub async fn scan_overdue(&self, tenant_id: Option<Uuid>) -> Result<usize, EngineError> {
        let overdue = self.store.list_overdue(tenant_id, Utc::now()).await?;
        let mut escalated = 0usize;
        for decision in overdue {
            let ctx = TenantContext::new(decision.tenant_id);
            match self.escalate(&ctx, None, decision.id, false).await {
                Ok(_) => escalated += 1,
                Err(e) => warn!(
                    decision_id = %decision.id,
                    tenant_id = %decision.tenant_id,
                    error = %e,
                    "escalation skipped"
                ),
            }
        }
        Ok(escalated)
    }

    pub async fn get(&self, ctx: &TenantContext, id: Uuid) -> Result<Decision, EngineError> {
        Ok(self.store.get(ctx, id).await?)
    }

    pub async fn get_by_entity(
        &self,
        ctx: &TenantContext,
        entity_type: &str,
        entity_id: Uuid,
    ) -> Result<Vec<Decision>, EngineError> {
        Ok(self.store.get_by_entity(ctx, entity_type, entity_id).await?)
    }

    pub async fn history(
        &self,
        ctx: &TenantContext,
        decision_id: Uuid,
    ) -> Result<Vec<DecisionHistoryEntry>, EngineError> {
        Ok(self.store.history(ctx, decision_id).await?)
    }

    /// History across every decision that has gated one entity, oldest first.
    pub async fn history_for_entity(
        &self,
        ctx: &TenantContext,
        entity_type: &str,
        entity_id: Uuid,
    ) -> Result<Vec<DecisionHistoryEntry>, EngineError> {
        let decisions = self.store.get_by_entity(ctx, entity_type, entity_id).await?;
        let mut entries = Vec::new();
        for decision in &decisions {
            entries.extend(self.store.history(ctx, decision.id).await?);
        }
        entries.sort_by_key(|e| e.occurred_at);
        Ok(entries)
    }

    pub async fn list_for_assignee(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        page: Page,
    ) -> Result<Vec<Decision>, EngineError> {
        Ok(self.store.list_for_assignee(ctx, user_id, page).await?)
    }

    pub async fn list_for_requester(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        page: Page,
    ) -> Result<Vec<Decision>, EngineError> {
        Ok(self.store.list_for_requester(ctx, user_id, page).await?)
    }

    /// Reviewer assist summary for one decision. Read-only.
    pub async fn summarize(
        &self,
        ctx: &TenantContext,
        decision_id: Uuid,
    ) -> Result<AdvisorSummary, EngineError> {
        let decision = self.store.get(ctx, decision_id).await?;
        let history = self.store.history(ctx, decision_id).await?;
        Ok(advisor::summarize(&decision, &history))
    }

    /// Load and gate a decision for a step-level action: existence, terminal
    /// state, step match and actor authorization, in that order.
    async fn load_actionable(
        &self,
        ctx: &TenantContext,
        decision_id: Uuid,
        step_order: i32,
        actor: &ActorContext,
    ) -> Result<Decision, TransitionError> {
        let decision = self
            .store
            .get(ctx, decision_id)
            .await
            .map_err(|e| TransitionError::new(e.into()))?;

        if decision.is_terminal() {
            let status = decision.status;
            return Err(TransitionError::rejected(
                EngineError::AlreadyTerminal { status },
                decision,
            ));
        }
        if step_order != decision.current_step_order {
            let current = decision.current_step_order;
            return Err(TransitionError::rejected(
                EngineError::StepMismatch {
                    requested: step_order,
                    current,
                },
                decision,
            ));
        }

        let authorized = match decision.current_step() {
            None => false,
            // An explicit assignee (delegation) replaces the role entirely.
            Some(step) => match step.assignee_user_id {
                Some(assignee) => actor.is_user(assignee),
                None => actor.has_role(&step.approver_role),
            },
        };
        if !authorized {
            return Err(TransitionError::rejected(EngineError::Unauthorized, decision));
        }

        Ok(decision)
    }

    /// Recompute priority/risk/SLA for the step the decision just advanced
    /// to, using the policy snapshot taken at submission.
    fn refresh_metadata(&self, decision: &mut Decision, now: DateTime<Utc>) {
        let snapshot: TenantPolicyConfig =
            serde_json::from_value(decision.policy_snapshot.clone()).unwrap_or_default();
        let due = decision.current_step().and_then(|s| s.due_at);
        let meta = derive_metadata(
            &decision.purpose,
            decision.amount,
            snapshot.amount_threshold,
            due,
            now,
            decision.current_step_order,
            decision.total_steps,
            &self.config.sla,
        );
        decision.priority = meta.priority;
        decision.risk_level = meta.risk_level;
        decision.sla_status = meta.sla_status;
        decision.sla_due_at = due;
        decision.policy_reason = Some(meta.policy_reason);
        decision.business_impact = Some(meta.business_impact);
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit(
        &self,
        ctx: &TenantContext,
        mut decision: Decision,
        action: DecisionAction,
        actor: Option<&ActorContext>,
        note: Option<String>,
        now: DateTime<Utc>,
        audit: Vec<AuditEntry>,
    ) -> Result<Decision, TransitionError> {
        let history = DecisionHistoryEntry::record(&decision, action, actor, note, now);
        self.store
            .commit_transition(ctx, &decision, &history, &audit)
            .await
            .map_err(|e| TransitionError::new(e.into()))?;
        decision.version += 1;

        info!(
            decision_id = %decision.id,
            tenant_id = %ctx.tenant_id,
            action = %action,
            status = %decision.status,
            "decision transition committed"
        );
        self.fanout.on_transition(&decision, &history).await;
        Ok(decision)
    }
}

/// Mark every still-pending step after `after_order` as skipped.
fn skip_later_steps(decision: &mut Decision, after_order: i32) {
    for step in &mut decision.steps {
        if step.step_order > after_order && step.status == StepStatus::Pending {
            step.status = StepStatus::Skipped;
        }
    }
}
