use rust_decimal::Decimal;
use uuid::Uuid;

/// Events emitted for downstream consumers (settlement, notifications).
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderIngested(OrderIngestedEvent),
    SubOrderStatusChanged(SubOrderStatusChangedEvent),
    OrderDelivered(OrderDeliveredEvent),
    ReturnStatusChanged(ReturnStatusChangedEvent),
    RefundCompleted(RefundEvent),
    RefundFailed(RefundEvent),
}

impl DomainEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            DomainEvent::OrderIngested(_) => "order.ingested",
            DomainEvent::SubOrderStatusChanged(_) => "sub_order.status_changed",
            DomainEvent::OrderDelivered(_) => "order.delivered",
            DomainEvent::ReturnStatusChanged(_) => "return.status_changed",
            DomainEvent::RefundCompleted(_) => "return.refund_completed",
            DomainEvent::RefundFailed(_) => "return.refund_failed",
        }
    }

    /// Partition key, so events for one aggregate stay ordered.
    pub fn key(&self) -> String {
        match self {
            DomainEvent::OrderIngested(e) => e.order_id.to_string(),
            DomainEvent::SubOrderStatusChanged(e) => e.order_id.to_string(),
            DomainEvent::OrderDelivered(e) => e.order_id.to_string(),
            DomainEvent::ReturnStatusChanged(e) => e.return_request_id.to_string(),
            DomainEvent::RefundCompleted(e) | DomainEvent::RefundFailed(e) => {
                e.return_request_id.to_string()
            }
        }
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderIngestedEvent {
    pub order_id: Uuid,
    pub external_id: String,
    pub sub_order_ids: Vec<Uuid>,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct SubOrderStatusChangedEvent {
    pub order_id: Uuid,
    pub sub_order_id: Uuid,
    pub from: String,
    pub to: String,
    pub tracking_number: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderDeliveredEvent {
    pub order_id: Uuid,
    pub external_id: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct ReturnStatusChangedEvent {
    pub return_request_id: Uuid,
    pub order_id: Uuid,
    pub from: String,
    pub to: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct RefundEvent {
    pub return_request_id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub reference: Option<String>,
    pub error: Option<String>,
    pub timestamp: i64,
}
