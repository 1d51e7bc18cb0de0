use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rates::RateCard;

/// A fulfillment location that ships part of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hub {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub phone: Option<String>,
    pub default_courier_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub supports_live_quotes: bool,
    pub is_active: bool,
}

/// Destination states sharing one rate profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: Uuid,
    pub name: String,
    pub states: Vec<String>,
    pub position: i32,
}

impl Zone {
    pub fn covers(&self, state: &str) -> bool {
        let state = state.trim();
        self.states.iter().any(|s| s.trim().eq_ignore_ascii_case(state))
    }
}

/// Rate-table row. `hub_id = None` applies to every hub in the zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingRate {
    pub id: Uuid,
    pub zone_id: Uuid,
    pub hub_id: Option<Uuid>,
    pub courier_id: Uuid,
    pub base_rate: Decimal,
    pub min_weight_threshold: Decimal,
    pub per_kg_rate: Decimal,
    pub vat_percentage: Decimal,
    pub delivery_timeline: Option<String>,
    pub is_active: bool,
}

impl ShippingRate {
    pub fn rate_card(&self) -> RateCard {
        RateCard::new(
            self.base_rate,
            self.min_weight_threshold,
            self.per_kg_rate,
            self.vat_percentage,
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZoneMatch<'a> {
    pub zone: &'a Zone,
    /// True when no zone listed the state and the first zone was used.
    pub fallback: bool,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CatalogError {
    #[error("No shipping zone configured")]
    NoZoneConfigured,
}

/// Read-only snapshot of the reference data the splitter works against.
/// Zones are kept in catalog order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub hubs: Vec<Hub>,
    pub couriers: Vec<Courier>,
    pub zones: Vec<Zone>,
    pub rates: Vec<ShippingRate>,
}

impl Catalog {
    /// Match the destination state against zone state lists (case-insensitive).
    /// Falls back to the first zone in catalog order when nothing matches.
    pub fn resolve_zone(&self, state: &str) -> Result<ZoneMatch<'_>, CatalogError> {
        if let Some(zone) = self.zones.iter().find(|z| z.covers(state)) {
            return Ok(ZoneMatch { zone, fallback: false });
        }

        self.zones
            .first()
            .map(|zone| ZoneMatch { zone, fallback: true })
            .ok_or(CatalogError::NoZoneConfigured)
    }

    pub fn hub(&self, id: Uuid) -> Option<&Hub> {
        self.hubs.iter().find(|h| h.id == id)
    }

    pub fn courier(&self, id: Uuid) -> Option<&Courier> {
        self.couriers.iter().find(|c| c.id == id && c.is_active)
    }

    /// Hub-specific rate first, then the zone-wide one. Rates whose courier
    /// is inactive are skipped.
    pub fn rate_for(&self, hub_id: Uuid, zone_id: Uuid) -> Option<&ShippingRate> {
        let usable = |r: &&ShippingRate| {
            r.is_active && r.zone_id == zone_id && self.courier(r.courier_id).is_some()
        };

        self.rates
            .iter()
            .filter(usable)
            .find(|r| r.hub_id == Some(hub_id))
            .or_else(|| self.rates.iter().filter(usable).find(|r| r.hub_id.is_none()))
    }

    /// Courier from the matched rate, else the hub's default courier.
    pub fn courier_for(&self, hub: &Hub, rate: Option<&ShippingRate>) -> Option<&Courier> {
        rate.and_then(|r| self.courier(r.courier_id))
            .or_else(|| hub.default_courier_id.and_then(|id| self.courier(id)))
    }
}
