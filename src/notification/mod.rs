//! Side-channel delivery after a committed transition: realtime pushes to the
//! people on the decision and the signed approval-queue handoff. Both legs are
//! best-effort; the transition itself is already durable by the time fanout
//! runs, so failures here are logged and never surfaced to the caller.

pub mod fanout;
pub mod queue;

pub use fanout::NotificationFanout;
pub use queue::{ApprovalQueue, ApprovalQueueMessage};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Payload pushed to a user's realtime channel when a decision they are on
/// changes state.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeEvent {
    pub decision_id: Uuid,
    pub tenant_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub entity_name: Option<String>,
    pub action: String,
    pub status: String,
    pub priority: String,
    pub sla_status: String,
    pub current_step_order: i32,
    pub total_steps: i32,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Transport for per-user realtime pushes. The engine only knows this seam;
/// embedders plug in their websocket/SSE hub.
#[async_trait]
pub trait RealtimePublisher: Send + Sync {
    async fn publish(&self, user_id: Uuid, event: &RealtimeEvent) -> anyhow::Result<()>;
}

/// Drops every event. Used by the daemon until a hub is wired in, and by
/// tests that do not assert on the realtime leg.
#[derive(Default)]
pub struct NoopPublisher;

#[async_trait]
impl RealtimePublisher for NoopPublisher {
    async fn publish(&self, _user_id: Uuid, _event: &RealtimeEvent) -> anyhow::Result<()> {
        Ok(())
    }
}
