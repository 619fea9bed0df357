//! Outbound approval-queue transport. When a decision lands on a new pending
//! step, a signed message is posted to the configured endpoint so external
//! worklist systems can pick it up.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

/// One work item for the external approval queue.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalQueueMessage {
    pub decision_id: Uuid,
    pub tenant_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub purpose: String,
    pub amount: Decimal,
    pub currency: String,
    pub approver_role: String,
    pub requested_by: Option<Uuid>,
    pub requested_at: DateTime<Utc>,
}

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns "sha256=<lowercase hex digest>".
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Posts queue messages over HTTP with HMAC-SHA256 signing and up to 3
/// retries with exponential back-off (1s → 5s → 25s). A queue constructed
/// without an endpoint is a no-op.
#[derive(Clone)]
pub struct ApprovalQueue {
    client: reqwest::Client,
    endpoint: Option<String>,
    signing_secret: Option<String>,
}

impl ApprovalQueue {
    pub fn new(endpoint: Option<String>, signing_secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("DecisionEngine-Queue/1.0")
                .build()
                .expect("failed to build queue HTTP client"),
            endpoint,
            signing_secret,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Deliver one message, awaiting the full retry schedule. Returns
    /// `Ok(())` immediately when no endpoint is configured.
    pub async fn enqueue(&self, message: &ApprovalQueueMessage) -> Result<()> {
        let Some(url) = self.endpoint.as_deref() else {
            return Ok(());
        };

        let payload = serde_json::to_vec(message)?;
        let delivery_id = Uuid::new_v4().to_string();
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self
            .signing_secret
            .as_deref()
            .map(|s| hmac_sha256_hex(s, &payload));

        let backoff_secs: &[u64] = &[0, 1, 5, 25];

        for (attempt, &delay) in backoff_secs.iter().enumerate() {
            if delay > 0 {
                tracing::debug!(
                    url,
                    attempt,
                    delay_secs = delay,
                    decision_id = %message.decision_id,
                    "retrying queue delivery"
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-decision-delivery-id", &delivery_id)
                .header("x-decision-timestamp", &timestamp)
                .header("x-decision-event", "approval_requested");

            if let Some(ref sig) = signature {
                req = req.header("x-decision-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        decision_id = %message.decision_id,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "queue message delivered"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    warn!(
                        url,
                        decision_id = %message.decision_id,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %status,
                        "queue delivery failed (non-2xx), will retry"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        decision_id = %message.decision_id,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "queue request error, will retry"
                    );
                }
            }
        }

        Err(anyhow::anyhow!(
            "queue delivery failed after 3 retries: {url}"
        ))
    }

    /// Fire-and-forget delivery. The retry schedule runs on a spawned task so
    /// the committing request never waits on the queue endpoint.
    pub fn dispatch(&self, message: ApprovalQueueMessage) {
        if !self.is_enabled() {
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            if let Err(e) = queue.enqueue(&message).await {
                warn!(decision_id = %message.decision_id, error = %e, "queue dispatch ultimately failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_signature_deterministic() {
        let sig1 = hmac_sha256_hex("secret123", b"payload");
        let sig2 = hmac_sha256_hex("secret123", b"payload");
        assert_eq!(sig1, sig2);
        assert!(sig1.starts_with("sha256="));
    }

    #[test]
    fn hmac_signature_varies_by_secret() {
        let sig1 = hmac_sha256_hex("secret1", b"payload");
        let sig2 = hmac_sha256_hex("secret2", b"payload");
        assert_ne!(sig1, sig2);
    }

    #[tokio::test]
    async fn disabled_queue_is_noop() {
        let queue = ApprovalQueue::disabled();
        assert!(!queue.is_enabled());
        let message = ApprovalQueueMessage {
            decision_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            entity_type: "opportunity".into(),
            entity_id: Uuid::new_v4(),
            purpose: "Discount".into(),
            amount: Decimal::from(5000u32),
            currency: "USD".into(),
            approver_role: "finance-manager".into(),
            requested_by: None,
            requested_at: Utc::now(),
        };
        queue.enqueue(&message).await.unwrap();
    }
}
