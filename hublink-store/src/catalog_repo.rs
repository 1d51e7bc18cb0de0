use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use hublink_catalog::{Catalog, Courier, Hub, ShippingRate, Zone};
use hublink_core::repository::CatalogRepository;
use hublink_core::CoreResult;

use crate::database::storage;

pub struct StoreCatalogRepository {
    pool: PgPool,
}

impl StoreCatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct HubRow {
    id: Uuid,
    name: String,
    address: String,
    city: String,
    state: String,
    phone: Option<String>,
    default_courier_id: Option<Uuid>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CourierRow {
    id: Uuid,
    name: String,
    code: String,
    supports_live_quotes: bool,
    is_active: bool,
}

#[derive(sqlx::FromRow)]
struct ZoneRow {
    id: Uuid,
    name: String,
    states: Vec<String>,
    position: i32,
}

#[derive(sqlx::FromRow)]
struct RateRow {
    id: Uuid,
    zone_id: Uuid,
    hub_id: Option<Uuid>,
    courier_id: Uuid,
    base_rate: Decimal,
    min_weight_threshold: Decimal,
    per_kg_rate: Decimal,
    vat_percentage: Decimal,
    delivery_timeline: Option<String>,
    is_active: bool,
}

#[async_trait]
impl CatalogRepository for StoreCatalogRepository {
    async fn load_catalog(&self) -> CoreResult<Catalog> {
        let hubs: Vec<HubRow> = sqlx::query_as(
            "SELECT id, name, address, city, state, phone, default_courier_id, is_active, created_at \
             FROM hubs WHERE is_active ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let couriers: Vec<CourierRow> =
            sqlx::query_as("SELECT id, name, code, supports_live_quotes, is_active FROM couriers")
                .fetch_all(&self.pool)
                .await
                .map_err(storage)?;

        // Catalog order matters: the first zone is the fallback.
        let zones: Vec<ZoneRow> =
            sqlx::query_as("SELECT id, name, states, position FROM zones ORDER BY position, name")
                .fetch_all(&self.pool)
                .await
                .map_err(storage)?;

        let rates: Vec<RateRow> = sqlx::query_as(
            "SELECT id, zone_id, hub_id, courier_id, base_rate, min_weight_threshold, per_kg_rate, \
             vat_percentage, delivery_timeline, is_active FROM shipping_rates WHERE is_active",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(Catalog {
            hubs: hubs
                .into_iter()
                .map(|r| Hub {
                    id: r.id,
                    name: r.name,
                    address: r.address,
                    city: r.city,
                    state: r.state,
                    phone: r.phone,
                    default_courier_id: r.default_courier_id,
                    is_active: r.is_active,
                    created_at: r.created_at,
                })
                .collect(),
            couriers: couriers
                .into_iter()
                .map(|r| Courier {
                    id: r.id,
                    name: r.name,
                    code: r.code,
                    supports_live_quotes: r.supports_live_quotes,
                    is_active: r.is_active,
                })
                .collect(),
            zones: zones
                .into_iter()
                .map(|r| Zone {
                    id: r.id,
                    name: r.name,
                    states: r.states,
                    position: r.position,
                })
                .collect(),
            rates: rates
                .into_iter()
                .map(|r| ShippingRate {
                    id: r.id,
                    zone_id: r.zone_id,
                    hub_id: r.hub_id,
                    courier_id: r.courier_id,
                    base_rate: r.base_rate,
                    min_weight_threshold: r.min_weight_threshold,
                    per_kg_rate: r.per_kg_rate,
                    vat_percentage: r.vat_percentage,
                    delivery_timeline: r.delivery_timeline,
                    is_active: r.is_active,
                })
                .collect(),
        })
    }
}
