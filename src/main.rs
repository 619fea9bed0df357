use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use decision_engine::config;
use decision_engine::engine::{DecisionEngine, EngineConfig};
use decision_engine::jobs::escalation;
use decision_engine::notification::{ApprovalQueue, NoopPublisher, NotificationFanout};
use decision_engine::store::postgres::PgDecisionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "decisiond=info,decision_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::load()?;

    let store = PgDecisionStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    store.migrate().await.context("running migrations")?;

    let queue = ApprovalQueue::new(config.queue_url.clone(), config.queue_signing_secret.clone());
    let fanout = NotificationFanout::new(Arc::new(NoopPublisher), queue);
    let engine = Arc::new(DecisionEngine::new(
        Arc::new(store),
        fanout,
        EngineConfig {
            sla: config.sla.clone(),
            admin_role: config.admin_role.clone(),
        },
    ));

    tracing::info!(
        scan_interval_secs = config.scan_interval_secs,
        "decisiond started"
    );
    escalation::run_periodic(engine, Duration::from_secs(config.scan_interval_secs)).await;
    Ok(())
}
