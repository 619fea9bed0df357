//! Policy resolution: turns a tenant's workflow configuration plus the
//! concrete request (amount, purpose) into the ordered step template, and
//! derives the routing metadata (priority, risk, SLA, policy reason) stamped
//! on the decision.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::config::SlaSettings;
use crate::context::RoleId;
use crate::errors::EngineError;
use crate::models::decision::{Priority, RiskLevel, SlaStatus};
use crate::models::policy::{PolicyStep, StepTemplate, TenantPolicyConfig};

pub struct PolicyResolver;

impl PolicyResolver {
    /// Materialize the approval chain for one request. Pure over its inputs.
    ///
    /// Returns an empty template when the workflow is disabled for the tenant
    /// (no explicit steps and no default approver role) — the caller decides
    /// whether that means auto-approval or rejection. Steps whose amount
    /// threshold is not met, or whose purpose does not match, are omitted
    /// entirely and the survivors renumbered 1..=n, so `total_steps`
    /// downstream counts only applicable steps.
    pub fn resolve(
        amount: Decimal,
        purpose: &str,
        config: &TenantPolicyConfig,
    ) -> Result<Vec<StepTemplate>, EngineError> {
        let configured: Vec<PolicyStep> = if config.steps.is_empty() {
            match &config.approver_role {
                None => return Ok(Vec::new()),
                Some(role) => vec![PolicyStep {
                    order: 1,
                    approver_role: role.as_str().to_string(),
                    amount_threshold: config.amount_threshold,
                    purpose: None,
                }],
            }
        } else {
            let mut steps = config.steps.clone();
            steps.sort_by_key(|s| s.order);
            steps
        };

        let mut applicable = Vec::new();
        for step in &configured {
            let purpose_matches = step
                .purpose
                .as_deref()
                .map_or(true, |p| p.eq_ignore_ascii_case(purpose));
            let threshold_met = step.amount_threshold.map_or(true, |t| amount >= t);
            if !purpose_matches || !threshold_met {
                continue;
            }
            let role = RoleId::new(&step.approver_role).ok_or_else(|| {
                EngineError::InvalidPolicyConfiguration(format!(
                    "configured step {} has a blank approver role",
                    step.order
                ))
            })?;
            applicable.push(StepTemplate {
                order: applicable.len() as i32 + 1,
                approver_role: role,
                purpose: step.purpose.clone(),
            });
        }

        Ok(applicable)
    }
}

/// SLA window for one step: purpose-sensitive base plus one hour per later
/// step in the chain.
pub fn sla_window(purpose: &str, step_order: i32, sla: &SlaSettings) -> Duration {
    let base_hours = if purpose.eq_ignore_ascii_case("discount") {
        sla.discount_hours
    } else if purpose.eq_ignore_ascii_case("close") {
        sla.close_hours
    } else {
        sla.default_hours
    };
    Duration::hours(base_hours + i64::from(step_order.max(1) - 1))
}

/// Routing metadata derived from the request shape and the current due time.
#[derive(Debug, Clone)]
pub struct RoutingMetadata {
    pub priority: Priority,
    pub risk_level: RiskLevel,
    pub sla_status: SlaStatus,
    pub policy_reason: String,
    pub business_impact: String,
}

pub fn derive_metadata(
    purpose: &str,
    amount: Decimal,
    amount_threshold: Option<Decimal>,
    due_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    step_order: i32,
    total_steps: i32,
    sla: &SlaSettings,
) -> RoutingMetadata {
    let is_discount = purpose.eq_ignore_ascii_case("discount");

    let overdue = due_at.map_or(false, |due| now > due);
    let at_risk = due_at.map_or(false, |due| {
        !overdue && (due - now) <= Duration::minutes(sla.at_risk_minutes)
    });
    let sla_status = if overdue {
        SlaStatus::Breached
    } else if at_risk {
        SlaStatus::AtRisk
    } else {
        SlaStatus::OnTrack
    };

    let threshold_triggered = amount_threshold
        .map_or(false, |t| t > Decimal::ZERO && amount >= t);
    let large_deal = amount_threshold
        .map_or(false, |t| t > Decimal::ZERO && amount >= t * Decimal::TWO);

    let risk_level = if overdue || large_deal {
        RiskLevel::High
    } else if at_risk || threshold_triggered || is_discount {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    let priority = if overdue {
        Priority::Critical
    } else {
        match risk_level {
            RiskLevel::High => Priority::High,
            RiskLevel::Medium => Priority::Medium,
            RiskLevel::Low => Priority::Normal,
        }
    };

    let policy_reason = if threshold_triggered {
        let threshold = amount_threshold.expect("threshold_triggered implies a threshold");
        format!("Amount {amount} exceeds tenant threshold {threshold}.")
    } else if is_discount {
        "Discount exception requires approver sign-off.".to_string()
    } else if total_steps > 1 {
        format!("Approval chain step {step_order} of {total_steps} is pending.")
    } else {
        format!("Approval routing requires {purpose} sign-off.")
    };

    let business_impact = if amount >= Decimal::from(100_000u32) {
        "high impact"
    } else if amount >= Decimal::from(25_000u32) {
        "medium impact"
    } else {
        "low impact"
    }
    .to_string();

    RoutingMetadata {
        priority,
        risk_level,
        sla_status,
        policy_reason,
        business_impact,
    }
}
