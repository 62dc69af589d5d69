use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use farmgate_api::{app, metrics::Metrics, state::{AppState, AuthConfig}, worker};
use farmgate_core::{Notifier, TracingNotifier};
use farmgate_order::{InMemoryStore, SettlementOrchestrator, SettlementStore};
use farmgate_store::{Config, DbClient, EventProducer, KafkaNotifier, PgSettlementStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "farmgate_api=debug,farmgate_order=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Farmgate settlement API on port {}", config.server.port);

    let store: Arc<dyn SettlementStore> = match &config.database.url {
        Some(url) => {
            let db = DbClient::new(url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            Arc::new(PgSettlementStore::new(db.pool.clone()))
        }
        None => {
            tracing::warn!("No database.url configured, using the in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.kafka.brokers {
        Some(brokers) => {
            let producer = EventProducer::new(brokers).context("Failed to create Kafka producer")?;
            Arc::new(KafkaNotifier::new(producer, &config.kafka.topic))
        }
        None => Arc::new(TracingNotifier),
    };

    let orchestrator = Arc::new(
        SettlementOrchestrator::new(store, config.settlement.policy()).with_notifier(notifier),
    );
    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);

    tokio::spawn(worker::start_auto_release_worker(
        orchestrator.clone(),
        metrics.clone(),
        Duration::from_secs(config.settlement.sweep_interval_seconds),
    ));

    let app_state = AppState {
        orchestrator,
        auth: AuthConfig { secret: config.auth.jwt_secret.clone() },
        metrics,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(app_state)).await?;
    Ok(())
}
