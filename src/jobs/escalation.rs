//! Background SLA scan. Finds pending decisions whose current step is past
//! due and escalates them through the engine, so the scheduler path takes
//! exactly the same transition as a forced escalation would.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use uuid::Uuid;

use crate::engine::DecisionEngine;

/// One scan pass. Returns how many decisions were escalated.
pub async fn run_escalation_scan(
    engine: &DecisionEngine,
    tenant_id: Option<Uuid>,
) -> anyhow::Result<usize> {
    let escalated = engine.scan_overdue(tenant_id).await?;
    if escalated > 0 {
        info!(escalated, "escalation scan finished");
    }
    Ok(escalated)
}

/// Scan on a fixed cadence until the process exits. A failed pass is logged
/// and the next tick runs anyway; overdue decisions are simply picked up one
/// interval later.
pub async fn run_periodic(engine: Arc<DecisionEngine>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "escalation scheduler started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = run_escalation_scan(&engine, None).await {
            error!(error = %e, "escalation scan failed");
        }
    }
}
