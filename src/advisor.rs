//! Assist-only summaries and reply drafts for reviewers. Everything here is
//! derived deterministically from the decision aggregate and its history;
//! nothing it produces is ever acted on automatically, and every summary
//! carries the disclaimer verbatim.

use crate::models::advisor::{AdvisorSummary, RecommendedAction};
use crate::models::decision::{Decision, DecisionStatus, RiskLevel, SlaStatus};
use crate::models::history::{DecisionAction, DecisionHistoryEntry};

pub const DISCLAIMER: &str =
    "Assist-only draft. Reviewer remains responsible for the final decision and note.";

/// Build the reviewer-facing summary for one decision.
pub fn summarize(decision: &Decision, history: &[DecisionHistoryEntry]) -> AdvisorSummary {
    let missing_evidence = missing_evidence(decision);
    let recommended_action = recommend(decision, &missing_evidence);

    let entity = decision
        .entity_name
        .as_deref()
        .unwrap_or(&decision.entity_type);
    let requester = decision
        .requested_by_name
        .as_deref()
        .unwrap_or("the requester");
    let delegations = history
        .iter()
        .filter(|e| e.action == DecisionAction::Delegated)
        .count();

    let mut summary = format!(
        "{} approval for {} ({} {}), requested by {}. Step {} of {}, SLA {}.",
        decision.purpose,
        entity,
        decision.amount,
        decision.currency,
        requester,
        decision.current_step_order,
        decision.total_steps,
        decision.sla_status,
    );
    if let Some(reason) = &decision.policy_reason {
        summary.push(' ');
        summary.push_str(reason);
    }
    if delegations > 0 {
        summary.push_str(&format!(" Delegated {delegations} time(s)."));
    }

    AdvisorSummary {
        decision_id: decision.id,
        summary,
        recommended_action,
        approve_draft: format!(
            "Approved: {} for {} at {} {} fits policy. Proceed.",
            decision.purpose, entity, decision.amount, decision.currency
        ),
        reject_draft: format!(
            "Rejected: {} for {} at {} {} is not supportable as submitted. \
             Please revise and resubmit with updated terms.",
            decision.purpose, entity, decision.amount, decision.currency
        ),
        request_info_draft: request_info_draft(&missing_evidence),
        missing_evidence,
        disclaimer: DISCLAIMER.to_string(),
    }
}

/// Gaps a reviewer would want filled before signing off.
fn missing_evidence(decision: &Decision) -> Vec<String> {
    let mut gaps = Vec::new();
    let is_discount = decision.purpose.eq_ignore_ascii_case("discount");

    if is_discount {
        gaps.push("Discount justification from the requester.".to_string());
        gaps.push("Margin impact at the requested discount level.".to_string());
        if decision.payload.get("pricing_notes").is_none() {
            gaps.push("Pricing notes are absent from the request payload.".to_string());
        }
    }
    if decision.purpose.to_ascii_lowercase().contains("exception") {
        gaps.push("Rationale for the policy exception.".to_string());
    }
    if decision.sla_status == SlaStatus::Breached {
        gaps.push("Reason the approval window was missed.".to_string());
    }
    if decision.risk_level == RiskLevel::High {
        gaps.push("Risk controls or compensating terms for a high-risk request.".to_string());
    }
    if gaps.is_empty() {
        gaps.push("Confirmation that the underlying record is up to date.".to_string());
    }
    gaps
}

fn recommend(decision: &Decision, gaps: &[String]) -> RecommendedAction {
    if decision.status != DecisionStatus::Pending {
        return RecommendedAction::Review;
    }
    if decision.sla_status == SlaStatus::Breached {
        return RecommendedAction::RequestInfo;
    }
    if decision.risk_level == RiskLevel::High && gaps.len() > 1 {
        return RecommendedAction::RequestInfo;
    }
    RecommendedAction::Approve
}

fn request_info_draft(gaps: &[String]) -> String {
    let mut draft =
        String::from("Before I can decide, please provide the following:\n");
    for gap in gaps {
        draft.push_str("- ");
        draft.push_str(gap);
        draft.push('\n');
    }
    draft
}
