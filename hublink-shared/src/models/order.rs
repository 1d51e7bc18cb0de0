use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::pii::Masked;

/// Aggregate status of a customer order across all of its hub shipments.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Processing,
    Delivered,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Processing => "processing",
            OrderStatus::Delivered => "delivered",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(OrderStatus::Processing),
            "delivered" => Ok(OrderStatus::Delivered),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-order (per-hub shipment) status.
///
/// `Pending -> Assigned` happens when the courier shipment is created; every
/// later move is driven by courier status updates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubOrderStatus {
    Pending,
    Assigned,
    Processing,
    InTransit,
    OutForDelivery,
    Delivered,
    Cancelled,
    Returned,
}

impl SubOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubOrderStatus::Pending => "pending",
            SubOrderStatus::Assigned => "assigned",
            SubOrderStatus::Processing => "processing",
            SubOrderStatus::InTransit => "in_transit",
            SubOrderStatus::OutForDelivery => "out_for_delivery",
            SubOrderStatus::Delivered => "delivered",
            SubOrderStatus::Cancelled => "cancelled",
            SubOrderStatus::Returned => "returned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubOrderStatus::Delivered | SubOrderStatus::Cancelled | SubOrderStatus::Returned
        )
    }

    /// Counts toward the parent order being complete.
    pub fn is_settled(&self) -> bool {
        matches!(self, SubOrderStatus::Delivered | SubOrderStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: SubOrderStatus) -> bool {
        use SubOrderStatus::*;

        match (self, next) {
            (Pending, Assigned) => true,
            (Assigned, Processing | InTransit | OutForDelivery | Delivered | Cancelled | Returned) => true,
            (Processing, Processing | InTransit | OutForDelivery | Delivered | Cancelled | Returned) => true,
            (InTransit, OutForDelivery | Delivered | Cancelled | Returned) => true,
            (OutForDelivery, Delivered | Cancelled | Returned) => true,
            _ => false,
        }
    }
}

impl FromStr for SubOrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubOrderStatus::Pending),
            "assigned" => Ok(SubOrderStatus::Assigned),
            "processing" => Ok(SubOrderStatus::Processing),
            "in_transit" => Ok(SubOrderStatus::InTransit),
            "out_for_delivery" => Ok(SubOrderStatus::OutForDelivery),
            "delivered" => Ok(SubOrderStatus::Delivered),
            "cancelled" => Ok(SubOrderStatus::Cancelled),
            "returned" => Ok(SubOrderStatus::Returned),
            other => Err(format!("unknown sub-order status: {}", other)),
        }
    }
}

impl fmt::Display for SubOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The customer's purchase as received from the commerce backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    /// Commerce backend order id; the idempotency key for ingestion.
    pub external_id: String,
    pub customer_id: Option<String>,
    pub customer_name: String,
    pub customer_email: Masked<String>,
    pub customer_phone: Option<Masked<String>>,
    pub shipping_address: String,
    pub shipping_city: String,
    pub shipping_state: String,
    pub subtotal: Decimal,
    pub total: Decimal,
    pub shipping_fee_paid: Decimal,
    pub payment_status: String,
    pub overall_status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Item total, i.e. what the customer paid minus shipping.
    pub fn items_total(&self) -> Decimal {
        self.total - self.shipping_fee_paid
    }

    pub fn belongs_to(&self, customer_id: Option<&str>, email: Option<&str>) -> bool {
        let id_match = match (customer_id, self.customer_id.as_deref()) {
            (Some(claimed), Some(owner)) => !claimed.is_empty() && claimed == owner,
            _ => false,
        };
        let email_match = email
            .map(|e| !e.trim().is_empty() && e.trim().eq_ignore_ascii_case(self.customer_email.expose().trim()))
            .unwrap_or(false);

        id_match || email_match
    }
}

/// Snapshot of a purchased line, embedded in its sub-order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub product_id: Option<String>,
    pub sku: Option<String>,
    pub name: String,
    pub quantity: u32,
    /// Unit weight in kilograms.
    pub weight: Decimal,
    /// Unit price.
    pub price: Decimal,
    pub hub_id: Option<Uuid>,
}

impl Item {
    pub fn line_weight(&self) -> Decimal {
        self.weight * Decimal::from(self.quantity)
    }

    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }

    pub fn is_valid(&self) -> bool {
        self.quantity >= 1 && self.weight >= Decimal::ZERO
    }
}

/// The part of an order shipped from one hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubOrder {
    pub id: Uuid,
    pub order_id: Uuid,
    pub hub_id: Uuid,
    pub courier_id: Option<Uuid>,
    pub items: Vec<Item>,
    pub total_weight: Decimal,
    pub items_total: Decimal,
    /// What the courier charges us, VAT included.
    pub real_shipping_cost: Decimal,
    pub shipping_vat: Decimal,
    /// Share of the customer-paid shipping fee.
    pub allocated_shipping_fee: Decimal,
    pub shipping_profit_loss: Decimal,
    pub cost_source: String,
    pub delivery_timeline: Option<String>,
    pub courier_order_id: Option<String>,
    pub tracking_number: Option<String>,
    pub status: SubOrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackingSource {
    System,
    Webhook,
    Reconciliation,
}

impl TrackingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingSource::System => "system",
            TrackingSource::Webhook => "webhook",
            TrackingSource::Reconciliation => "reconciliation",
        }
    }
}

impl FromStr for TrackingSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(TrackingSource::System),
            "webhook" => Ok(TrackingSource::Webhook),
            "reconciliation" => Ok(TrackingSource::Reconciliation),
            other => Err(format!("unknown tracking source: {}", other)),
        }
    }
}

/// Append-only log entry for a sub-order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub id: Uuid,
    pub sub_order_id: Uuid,
    pub status: SubOrderStatus,
    pub provider_status: Option<String>,
    pub description: Option<String>,
    pub source: TrackingSource,
    pub created_at: DateTime<Utc>,
}

impl TrackingEvent {
    pub fn new(sub_order_id: Uuid, status: SubOrderStatus, source: TrackingSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            sub_order_id,
            status,
            provider_status: None,
            description: None,
            source,
            created_at: Utc::now(),
        }
    }

    pub fn with_provider_status(mut self, provider_status: impl Into<String>) -> Self {
        self.provider_status = Some(provider_status.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
