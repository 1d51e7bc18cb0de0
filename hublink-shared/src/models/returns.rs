use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::pii::Masked;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReturnMethod {
    Pickup,
    Dropoff,
}

impl ReturnMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnMethod::Pickup => "pickup",
            ReturnMethod::Dropoff => "dropoff",
        }
    }
}

impl FromStr for ReturnMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pickup" => Ok(ReturnMethod::Pickup),
            "dropoff" => Ok(ReturnMethod::Dropoff),
            other => Err(format!("unknown return method: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPreference {
    Refund,
    Replacement,
}

impl ResolutionPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionPreference::Refund => "refund",
            ResolutionPreference::Replacement => "replacement",
        }
    }
}

impl FromStr for ResolutionPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "refund" => Ok(ResolutionPreference::Refund),
            "replacement" => Ok(ResolutionPreference::Replacement),
            other => Err(format!("unknown resolution: {}", other)),
        }
    }
}

/// Return request lifecycle. The return shipment always mirrors it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    Requested,
    PickupScheduled,
    AwaitingDropoff,
    InTransit,
    DeliveredToHub,
    InspectionInProgress,
    Approved,
    Rejected,
    RefundProcessing,
    RefundCompleted,
    RefundFailed,
    Cancelled,
}

impl ReturnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnStatus::Requested => "requested",
            ReturnStatus::PickupScheduled => "pickup_scheduled",
            ReturnStatus::AwaitingDropoff => "awaiting_dropoff",
            ReturnStatus::InTransit => "in_transit",
            ReturnStatus::DeliveredToHub => "delivered_to_hub",
            ReturnStatus::InspectionInProgress => "inspection_in_progress",
            ReturnStatus::Approved => "approved",
            ReturnStatus::Rejected => "rejected",
            ReturnStatus::RefundProcessing => "refund_processing",
            ReturnStatus::RefundCompleted => "refund_completed",
            ReturnStatus::RefundFailed => "refund_failed",
            ReturnStatus::Cancelled => "cancelled",
        }
    }

    /// Still waiting on the courier leg (pickup/drop-off through arrival at the hub).
    pub fn awaits_courier(&self) -> bool {
        matches!(
            self,
            ReturnStatus::Requested
                | ReturnStatus::PickupScheduled
                | ReturnStatus::AwaitingDropoff
                | ReturnStatus::InTransit
        )
    }

    /// No further transition is possible.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            ReturnStatus::Rejected | ReturnStatus::RefundCompleted | ReturnStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: ReturnStatus) -> bool {
        use ReturnStatus::*;

        match (self, next) {
            (Requested, PickupScheduled | AwaitingDropoff) => true,
            (PickupScheduled | AwaitingDropoff, InTransit | DeliveredToHub | Cancelled) => true,
            (InTransit, DeliveredToHub | Cancelled) => true,
            (DeliveredToHub, InspectionInProgress | Approved | Rejected) => true,
            (InspectionInProgress, Approved | Rejected) => true,
            (Approved, RefundProcessing) => true,
            (RefundProcessing, RefundCompleted | RefundFailed) => true,
            (RefundFailed, RefundProcessing) => true,
            _ => false,
        }
    }
}

impl FromStr for ReturnStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(ReturnStatus::Requested),
            "pickup_scheduled" => Ok(ReturnStatus::PickupScheduled),
            "awaiting_dropoff" => Ok(ReturnStatus::AwaitingDropoff),
            "in_transit" => Ok(ReturnStatus::InTransit),
            "delivered_to_hub" => Ok(ReturnStatus::DeliveredToHub),
            "inspection_in_progress" => Ok(ReturnStatus::InspectionInProgress),
            "approved" => Ok(ReturnStatus::Approved),
            "rejected" => Ok(ReturnStatus::Rejected),
            "refund_processing" => Ok(ReturnStatus::RefundProcessing),
            "refund_completed" => Ok(ReturnStatus::RefundCompleted),
            "refund_failed" => Ok(ReturnStatus::RefundFailed),
            "cancelled" => Ok(ReturnStatus::Cancelled),
            other => Err(format!("unknown return status: {}", other)),
        }
    }
}

impl fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub id: Uuid,
    pub order_id: Uuid,
    pub customer_id: Option<String>,
    pub customer_email: Masked<String>,
    pub method: ReturnMethod,
    pub resolution: ResolutionPreference,
    pub reason: String,
    pub evidence: Vec<String>,
    pub status: ReturnStatus,
    pub hub_id: Option<Uuid>,
    pub inspection_result: Option<String>,
    pub inspection_notes: Option<String>,
    pub approved_refund_amount: Option<Decimal>,
    pub refund_amount: Option<Decimal>,
    pub refund_currency: Option<String>,
    pub refund_reference: Option<String>,
    pub refund_raw: Option<Value>,
    pub refund_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReturnRequest {
    /// Approved for a replacement: nothing left for this machine to do.
    pub fn is_finished(&self) -> bool {
        self.status.is_closed()
            || (self.status == ReturnStatus::Approved
                && self.resolution == ResolutionPreference::Replacement)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnShipment {
    pub id: Uuid,
    pub return_request_id: Uuid,
    pub method: ReturnMethod,
    pub courier_id: Option<Uuid>,
    pub courier_order_id: Option<String>,
    pub tracking_id: Option<String>,
    pub status: ReturnStatus,
    pub pickup_address: Option<String>,
    pub hub_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
