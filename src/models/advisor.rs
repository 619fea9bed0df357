use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Approve,
    RequestInfo,
    Review,
}

/// Read-only reviewer assist output. Advisory, never authoritative: the
/// disclaimer is always populated and the advisor never mutates state.
#[derive(Debug, Clone, Serialize)]
pub struct AdvisorSummary {
    pub decision_id: Uuid,
    pub summary: String,
    pub recommended_action: RecommendedAction,
    pub approve_draft: String,
    pub reject_draft: String,
    pub request_info_draft: String,
    pub missing_evidence: Vec<String>,
    pub disclaimer: String,
}
