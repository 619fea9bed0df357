use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::context::RoleId;

/// Per-tenant approval workflow configuration.
///
/// A tenant may configure an explicit multi-step chain in `steps`; when that
/// is empty the single-step defaults (`approver_role` + `amount_threshold`)
/// apply. An unset `approver_role` with no explicit steps disables the
/// workflow entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantPolicyConfig {
    pub approver_role: Option<RoleId>,
    pub amount_threshold: Option<Decimal>,
    pub steps: Vec<PolicyStep>,
    pub escalation: EscalationPolicy,
    pub queue_enabled: bool,
}

/// One configured chain step, as stored. The role is kept raw here so the
/// resolver can reject a blank role as a configuration error rather than
/// silently dropping the step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyStep {
    pub order: i32,
    pub approver_role: String,
    pub amount_threshold: Option<Decimal>,
    /// Restricts the step to one request purpose; `None` applies to all.
    pub purpose: Option<String>,
}

impl Default for PolicyStep {
    fn default() -> Self {
        Self {
            order: 1,
            approver_role: String::new(),
            amount_threshold: None,
            purpose: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationPolicy {
    pub enabled: bool,
    /// Role the overdue step is reassigned to. Falls back to the step's own
    /// role when unset.
    pub fallback_role: Option<RoleId>,
    /// How far the due time is pushed out on escalation.
    pub extend_hours: i64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            fallback_role: RoleId::new("sales-manager"),
            extend_hours: 4,
        }
    }
}

/// A materialized step of the chain for one concrete request: thresholds and
/// purposes already filtered, orders renumbered 1..=n, roles validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub order: i32,
    pub approver_role: RoleId,
    pub purpose: Option<String>,
}
