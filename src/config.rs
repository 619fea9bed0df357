use serde::Deserialize;

use crate::context::RoleId;

/// SLA windows and escalation timing. Purpose-sensitive: discounts get the
/// tightest window, close approvals a working day's worth, everything else a
/// full day. Later chain steps get one extra hour per step.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlaSettings {
    pub discount_hours: i64,
    pub close_hours: i64,
    pub default_hours: i64,
    /// Minutes before the due time at which a pending step counts as at-risk.
    pub at_risk_minutes: i64,
}

impl Default for SlaSettings {
    fn default() -> Self {
        Self {
            discount_hours: 4,
            close_hours: 8,
            default_hours: 24,
            at_risk_minutes: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Seconds between escalation scan passes in the `decisiond` binary.
    pub scan_interval_secs: u64,
    /// Outbound approval queue endpoint. Unset = queue leg disabled.
    pub queue_url: Option<String>,
    pub queue_signing_secret: Option<String>,
    /// Role allowed to cancel any decision and force escalations.
    pub admin_role: RoleId,
    pub sla: SlaSettings,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let admin_role = std::env::var("DECISION_ADMIN_ROLE")
        .ok()
        .and_then(|v| RoleId::new(&v))
        .or_else(|| RoleId::new("administrator"))
        .expect("default admin role is non-blank");

    Ok(Config {
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/decisions".into()),
        scan_interval_secs: std::env::var("DECISION_SCAN_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120),
        queue_url: std::env::var("DECISION_QUEUE_URL").ok().filter(|v| !v.is_empty()),
        queue_signing_secret: std::env::var("DECISION_QUEUE_SIGNING_SECRET").ok(),
        admin_role,
        sla: SlaSettings {
            discount_hours: env_i64("DECISION_SLA_DISCOUNT_HOURS", 4),
            close_hours: env_i64("DECISION_SLA_CLOSE_HOURS", 8),
            default_hours: env_i64("DECISION_SLA_DEFAULT_HOURS", 24),
            at_risk_minutes: env_i64("DECISION_SLA_AT_RISK_MINUTES", 60),
        },
    })
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
