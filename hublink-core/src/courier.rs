use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use hublink_shared::SubOrderStatus;

use crate::status_map;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CourierEnv {
    Sandbox,
    Live,
}

#[derive(Debug, Clone)]
pub struct CourierCredentials {
    pub token: String,
    pub secret: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CourierCredentials {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Sender or recipient on a courier booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentParty {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: String,
    pub city: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentRequest {
    /// Our reference (sub-order id); providers echo it back.
    pub reference: String,
    pub sender: ShipmentParty,
    pub recipient: ShipmentParty,
    pub description: String,
    pub quantity: u32,
    pub weight: Decimal,
    pub value: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnPickupRequest {
    /// Return request id.
    pub reference: String,
    pub customer: ShipmentParty,
    pub hub: ShipmentParty,
    pub description: String,
    pub weight: Decimal,
    pub value: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub origin_state: String,
    pub destination_state: String,
    pub destination_city: String,
    pub weight: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedShipment {
    pub external_order_id: String,
    pub tracking_id: String,
    /// Provider answered with an error envelope that still carried an id.
    pub ambiguous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingUpdate {
    pub provider_status: String,
    pub description: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    pub provider_status: String,
    pub events: Vec<TrackingUpdate>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum CourierError {
    /// Auth failure, network error, timeout: callers apply their fallback.
    #[error("courier unavailable: {0}")]
    Unavailable(String),
    /// Provider answered but refused the request.
    #[error("courier rejected request: {0}")]
    Rejected(String),
}

/// Abstraction over a third-party delivery provider.
#[async_trait]
pub trait CourierAdapter: Send + Sync {
    async fn authenticate(&self, env: CourierEnv) -> Result<CourierCredentials, CourierError>;

    async fn create_shipment(&self, request: &ShipmentRequest) -> Result<CreatedShipment, CourierError>;

    /// Book a pickup from the customer back to the hub.
    async fn book_return_pickup(&self, request: &ReturnPickupRequest) -> Result<CreatedShipment, CourierError>;

    async fn fetch_tracking(&self, tracking_id: &str) -> Result<TrackingSnapshot, CourierError>;

    /// Live price (VAT inclusive) for a hub-to-destination parcel.
    async fn quote(&self, _request: &QuoteRequest) -> Result<Decimal, CourierError> {
        Err(CourierError::Unavailable("live quotes not supported".to_string()))
    }

    fn map_status(&self, provider_status: &str) -> SubOrderStatus {
        status_map::map_courier_status(provider_status)
    }
}
