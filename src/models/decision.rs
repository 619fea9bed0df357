use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::RoleId;

/// Terminal set is `{Approved, Rejected, Cancelled}`. Escalation is not a
/// status: it is recorded as a history entry plus [`SlaStatus::Breached`],
/// and the decision stays `Pending` with a reassigned step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum DecisionStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl DecisionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DecisionStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Pending => "pending",
            DecisionStatus::Approved => "approved",
            DecisionStatus::Rejected => "rejected",
            DecisionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(type_name = "varchar", rename_all = "kebab-case")]
pub enum SlaStatus {
    OnTrack,
    AtRisk,
    Breached,
}

impl SlaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlaStatus::OnTrack => "on-track",
            SlaStatus::AtRisk => "at-risk",
            SlaStatus::Breached => "breached",
        }
    }
}

impl std::fmt::Display for SlaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum Priority {
    Normal,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
    Delegated,
}

/// One ordered unit of required approval within a decision's chain.
/// Unique per `(decision_id, step_order)`. Immutable once its status leaves
/// `Pending`, except that delegation may swap the assignee of a still-pending
/// step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionStep {
    pub decision_id: Uuid,
    pub step_order: i32,
    pub step_type: String,
    pub approver_role: RoleId,
    pub assignee_user_id: Option<Uuid>,
    pub assignee_name: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub status: StepStatus,
    pub decided_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// The approval-request aggregate root. Owns its steps and history; holds
/// weak references (type + id) to the gated business entity and to user
/// identities. Mutated only through the state machine, guarded by `version`.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Optimistic concurrency stamp; bumped on every committed transition.
    pub version: i64,
    pub decision_type: String,
    pub workflow_type: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub entity_name: Option<String>,
    pub purpose: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: DecisionStatus,
    pub priority: Priority,
    pub risk_level: RiskLevel,
    pub sla_status: SlaStatus,
    pub sla_due_at: Option<DateTime<Utc>>,
    pub requested_by: Option<Uuid>,
    pub requested_by_name: Option<String>,
    /// Always in `[1, total_steps]` while pending; frozen once terminal.
    pub current_step_order: i32,
    pub total_steps: i32,
    /// Immutable copy of the policy in effect at creation, kept for audit
    /// reproducibility even if tenant policy later changes.
    pub policy_snapshot: serde_json::Value,
    /// Business-specific context; immutable after creation.
    pub payload: serde_json::Value,
    pub policy_reason: Option<String>,
    pub business_impact: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Vec<DecisionStep>,
}

impl Decision {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn current_step(&self) -> Option<&DecisionStep> {
        self.steps
            .iter()
            .find(|s| s.step_order == self.current_step_order)
    }

    pub fn current_step_mut(&mut self) -> Option<&mut DecisionStep> {
        let order = self.current_step_order;
        self.steps.iter_mut().find(|s| s.step_order == order)
    }

    /// The identity currently expected to act, if the step has an explicit
    /// assignee.
    pub fn current_assignee(&self) -> Option<Uuid> {
        self.current_step().and_then(|s| s.assignee_user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!DecisionStatus::Pending.is_terminal());
        assert!(DecisionStatus::Approved.is_terminal());
        assert!(DecisionStatus::Rejected.is_terminal());
        assert!(DecisionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&DecisionStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert_eq!(
            serde_json::to_string(&SlaStatus::AtRisk).unwrap(),
            "\"at-risk\""
        );
    }
}
