use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::models::decision::{Decision, DecisionStatus};
use crate::models::history::{DecisionAction, DecisionHistoryEntry};
use crate::notification::queue::{ApprovalQueue, ApprovalQueueMessage};
use crate::notification::{RealtimeEvent, RealtimePublisher};

/// Fans one committed transition out to the realtime channel and, when the
/// decision is waiting on a (new) approver, to the approval queue.
pub struct NotificationFanout {
    realtime: Arc<dyn RealtimePublisher>,
    queue: ApprovalQueue,
}

impl NotificationFanout {
    pub fn new(realtime: Arc<dyn RealtimePublisher>, queue: ApprovalQueue) -> Self {
        Self { realtime, queue }
    }

    /// Called after the store commit. Never fails: both legs log and move on.
    pub async fn on_transition(&self, decision: &Decision, entry: &DecisionHistoryEntry) {
        let event = RealtimeEvent {
            decision_id: decision.id,
            tenant_id: decision.tenant_id,
            entity_type: decision.entity_type.clone(),
            entity_id: decision.entity_id,
            entity_name: decision.entity_name.clone(),
            action: entry.action.as_str().to_string(),
            status: decision.status.as_str().to_string(),
            priority: format!("{:?}", decision.priority).to_lowercase(),
            sla_status: decision.sla_status.as_str().to_string(),
            current_step_order: decision.current_step_order,
            total_steps: decision.total_steps,
            note: entry.note.clone(),
            occurred_at: entry.occurred_at,
        };

        for user_id in self.recipients(decision) {
            if let Err(e) = self.realtime.publish(user_id, &event).await {
                warn!(
                    decision_id = %decision.id,
                    user_id = %user_id,
                    error = %e,
                    "realtime publish failed"
                );
            }
        }

        if self.wants_queue_leg(decision, entry.action) {
            if let Some(step) = decision.current_step() {
                self.queue.dispatch(ApprovalQueueMessage {
                    decision_id: decision.id,
                    tenant_id: decision.tenant_id,
                    entity_type: decision.entity_type.clone(),
                    entity_id: decision.entity_id,
                    purpose: decision.purpose.clone(),
                    amount: decision.amount,
                    currency: decision.currency.clone(),
                    approver_role: step.approver_role.as_str().to_string(),
                    requested_by: decision.requested_by,
                    requested_at: decision.requested_at,
                });
            }
        }
    }

    /// Requester plus the current step's assignee, deduplicated.
    fn recipients(&self, decision: &Decision) -> Vec<Uuid> {
        let mut out = Vec::with_capacity(2);
        if let Some(requester) = decision.requested_by {
            out.push(requester);
        }
        if let Some(assignee) = decision.current_assignee() {
            if !out.contains(&assignee) {
                out.push(assignee);
            }
        }
        out
    }

    /// The queue gets a message whenever a pending step (re)starts waiting:
    /// on submission, when an approval advances to the next step, and when an
    /// escalation reassigns the step. The leg is opt-in per tenant via the
    /// `queue_enabled` flag in the policy snapshot taken at submission.
    fn wants_queue_leg(&self, decision: &Decision, action: DecisionAction) -> bool {
        let tenant_opted_in = decision
            .policy_snapshot
            .get("queue_enabled")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        tenant_opted_in
            && decision.status == DecisionStatus::Pending
            && matches!(
                action,
                DecisionAction::Submitted | DecisionAction::Approved | DecisionAction::Escalated
            )
    }
}
