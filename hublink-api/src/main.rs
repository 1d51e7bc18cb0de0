use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hublink_api::{app, worker, AppState, Backends};
use hublink_connectors::{CommerceSettings, CourierSettings, HttpCourierAdapter, HttpRefundConnector};
use hublink_core::EventPublisher;
use hublink_store::{
    Config, DbClient, RedisClient, StoreCatalogRepository, StoreOrderRepository, StoreReturnRepository,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hublink_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting HubLink API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let redis = Arc::new(
        RedisClient::new(&config.redis.url)
            .await
            .context("Failed to connect to Redis")?,
    );

    let courier = HttpCourierAdapter::new(CourierSettings {
        environment: config.courier.environment,
        sandbox_url: config.courier.sandbox_url.clone(),
        live_url: config.courier.live_url.clone(),
        username: config.courier.username.clone(),
        password: config.courier.password.clone(),
        request_timeout: Duration::from_millis(config.courier.request_timeout_ms),
    })
    .context("Failed to build courier client")?;

    let refunds = HttpRefundConnector::new(CommerceSettings {
        base_url: config.commerce.base_url.clone(),
        consumer_key: config.commerce.consumer_key.clone(),
        consumer_secret: config.commerce.consumer_secret.clone(),
        currency: config.commerce.currency.clone(),
        request_timeout: Duration::from_millis(config.courier.request_timeout_ms),
    })
    .context("Failed to build refund client")?;

    let backends = Backends {
        orders: Arc::new(StoreOrderRepository::new(db.pool.clone())),
        returns: Arc::new(StoreReturnRepository::new(db.pool.clone())),
        catalog: Arc::new(StoreCatalogRepository::new(db.pool.clone())),
        courier: Arc::new(courier),
        refunds: Arc::new(refunds),
        locks: redis.clone(),
        events: event_publisher(&config)?,
        rate_limiter: Some(redis),
    };

    let state = AppState::new(&config, backends);

    tokio::spawn(worker::start_sync_worker(state.sync.clone(), config.sync.interval_seconds));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state).into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

#[cfg(feature = "kafka")]
fn event_publisher(config: &Config) -> anyhow::Result<Arc<dyn EventPublisher>> {
    match &config.kafka {
        Some(kafka) => {
            let producer = hublink_store::EventProducer::new(&kafka.brokers).context("Failed to create Kafka producer")?;
            Ok(Arc::new(producer))
        }
        None => Ok(Arc::new(hublink_core::events::TracingPublisher)),
    }
}

#[cfg(not(feature = "kafka"))]
fn event_publisher(_config: &Config) -> anyhow::Result<Arc<dyn EventPublisher>> {
    Ok(Arc::new(hublink_core::events::TracingPublisher))
}
