use std::sync::Arc;
use std::time::Duration;

use hublink_catalog::RateCard;
use hublink_core::{
    CatalogRepository, CourierAdapter, EventPublisher, OrderRepository, RateLimiter, RefundConnector,
    ReturnRepository, ShipmentLocks,
};
use hublink_order::{
    HubSplitter, IngestionGateway, ReconciliationSync, ReturnService, ReturnSettings, ShipmentService,
    SplitSettings,
};
use hublink_store::Config;

/// Storage and outbound clients the services are built on.
pub struct Backends {
    pub orders: Arc<dyn OrderRepository>,
    pub returns: Arc<dyn ReturnRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub courier: Arc<dyn CourierAdapter>,
    pub refunds: Arc<dyn RefundConnector>,
    pub locks: Arc<dyn ShipmentLocks>,
    pub events: Arc<dyn EventPublisher>,
    /// Webhook rate limiting is skipped when absent.
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
}

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<dyn OrderRepository>,
    pub gateway: Arc<IngestionGateway>,
    pub shipments: Arc<ShipmentService>,
    pub returns: Arc<ReturnService>,
    pub sync: Arc<ReconciliationSync>,
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
    pub webhook_secret: Option<String>,
}

impl AppState {
    pub fn new(config: &Config, backends: Backends) -> Self {
        let fulfillment = &config.fulfillment;
        let lock_ttl = config.sync.lock_ttl_seconds;

        let splitter = Arc::new(HubSplitter::new(
            backends.courier.clone(),
            SplitSettings {
                default_hub_id: fulfillment.default_hub_id,
                allocation_policy: fulfillment.allocation_policy,
                fallback_rate: RateCard::new(
                    fulfillment.fallback_base_rate,
                    fulfillment.fallback_min_weight_kg,
                    fulfillment.fallback_per_kg_rate,
                    fulfillment.fallback_vat_percentage,
                ),
                default_delivery_timeline: fulfillment.default_delivery_timeline.clone(),
                quote_timeout: Duration::from_millis(config.courier.quote_timeout_ms),
            },
        ));

        let shipments = Arc::new(ShipmentService::new(
            backends.orders.clone(),
            backends.catalog.clone(),
            backends.courier.clone(),
            backends.locks.clone(),
            backends.events.clone(),
            lock_ttl,
        ));

        let returns = Arc::new(ReturnService::new(
            backends.orders.clone(),
            backends.returns.clone(),
            backends.catalog.clone(),
            backends.courier.clone(),
            backends.refunds.clone(),
            backends.locks.clone(),
            backends.events.clone(),
            ReturnSettings {
                window_days: config.returns.window_days,
                lock_ttl_seconds: lock_ttl,
            },
        ));

        let gateway = Arc::new(IngestionGateway::new(
            backends.orders.clone(),
            backends.catalog.clone(),
            splitter,
            shipments.clone(),
            backends.events.clone(),
            fulfillment.auto_dispatch,
        ));

        let sync = Arc::new(ReconciliationSync::new(
            backends.orders.clone(),
            backends.returns.clone(),
            backends.courier.clone(),
            shipments.clone(),
            returns.clone(),
            config.sync.max_concurrency,
        ));

        Self {
            orders: backends.orders,
            gateway,
            shipments,
            returns,
            sync,
            rate_limiter: backends.rate_limiter,
            webhook_secret: config.commerce.webhook_secret.clone().filter(|s| !s.is_empty()),
        }
    }
}
