use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ActorContext;
use crate::models::decision::{Decision, DecisionStatus, Priority, RiskLevel, SlaStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum DecisionAction {
    Submitted,
    Approved,
    Rejected,
    Delegated,
    Escalated,
    Cancelled,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Submitted => "submitted",
            DecisionAction::Approved => "approved",
            DecisionAction::Rejected => "rejected",
            DecisionAction::Delegated => "delegated",
            DecisionAction::Escalated => "escalated",
            DecisionAction::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit ledger for one decision: exactly one entry per accepted
/// transition, committed atomically with the aggregate mutation. Never
/// mutated or deleted.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionHistoryEntry {
    pub id: Uuid,
    pub decision_id: Uuid,
    pub action: DecisionAction,
    /// `None` for system actions (SLA escalation).
    pub actor_user_id: Option<Uuid>,
    pub actor_name: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub status: DecisionStatus,
    pub priority: Priority,
    pub risk_level: RiskLevel,
    pub sla_status: SlaStatus,
    pub note: Option<String>,
    /// Why the action was allowed or routed this way.
    pub policy_reason: Option<String>,
}

impl DecisionHistoryEntry {
    /// Snapshot the resulting state of `decision` after an accepted
    /// transition.
    pub fn record(
        decision: &Decision,
        action: DecisionAction,
        actor: Option<&ActorContext>,
        note: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            decision_id: decision.id,
            action,
            actor_user_id: actor.and_then(|a| a.user_id),
            actor_name: actor.map(|a| a.display_name.clone()),
            occurred_at,
            status: decision.status,
            priority: decision.priority,
            risk_level: decision.risk_level,
            sla_status: decision.sla_status,
            note,
            policy_reason: decision.policy_reason.clone(),
        }
    }
}
