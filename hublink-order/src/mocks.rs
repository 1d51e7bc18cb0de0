//! In-process stand-ins for the courier and refund backends.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use hublink_core::courier::{
    CourierCredentials, CreatedShipment, QuoteRequest, ReturnPickupRequest, ShipmentRequest,
    TrackingSnapshot, TrackingUpdate,
};
use hublink_core::refund::{RefundConnector, RefundError, RefundReceipt};
use hublink_core::{CourierAdapter, CourierEnv, CourierError};

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Books shipments as `MOCK-<n>` and reports whatever tracking status was
/// last set for an id.
#[derive(Default)]
pub struct MockCourierAdapter {
    quote: Option<Decimal>,
    quote_delay: Option<Duration>,
    fail_bookings: AtomicBool,
    ambiguous_bookings: AtomicBool,
    bookings: AtomicUsize,
    tracking: Mutex<HashMap<String, String>>,
    broken_tracking: Mutex<HashSet<String>>,
}

impl MockCourierAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quote(mut self, total: Decimal) -> Self {
        self.quote = Some(total);
        self
    }

    pub fn with_quote_delay(mut self, delay: Duration) -> Self {
        self.quote_delay = Some(delay);
        self
    }

    pub fn fail_bookings(&self, fail: bool) {
        self.fail_bookings.store(fail, Ordering::SeqCst);
    }

    /// Bookings succeed, but through an error envelope carrying the id.
    pub fn ambiguous_bookings(&self, ambiguous: bool) {
        self.ambiguous_bookings.store(ambiguous, Ordering::SeqCst);
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.load(Ordering::SeqCst)
    }

    pub fn set_tracking_status(&self, tracking_id: &str, provider_status: &str) {
        guard(&self.tracking).insert(tracking_id.to_string(), provider_status.to_string());
    }

    pub fn break_tracking(&self, tracking_id: &str) {
        guard(&self.broken_tracking).insert(tracking_id.to_string());
    }

    fn book(&self) -> Result<CreatedShipment, CourierError> {
        if self.fail_bookings.load(Ordering::SeqCst) {
            return Err(CourierError::Unavailable("mock courier offline".to_string()));
        }
        let n = self.bookings.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("MOCK-{}", n);
        self.set_tracking_status(&id, "Pending Pick-Up");

        Ok(CreatedShipment {
            external_order_id: id.clone(),
            tracking_id: id,
            ambiguous: self.ambiguous_bookings.load(Ordering::SeqCst),
        })
    }
}

#[async_trait]
impl CourierAdapter for MockCourierAdapter {
    async fn authenticate(&self, _env: CourierEnv) -> Result<CourierCredentials, CourierError> {
        Ok(CourierCredentials {
            token: "mock_token".to_string(),
            secret: "mock_secret".to_string(),
            expires_at: Some(Utc::now() + ChronoDuration::hours(1)),
        })
    }

    async fn create_shipment(&self, _request: &ShipmentRequest) -> Result<CreatedShipment, CourierError> {
        self.book()
    }

    async fn book_return_pickup(&self, _request: &ReturnPickupRequest) -> Result<CreatedShipment, CourierError> {
        self.book()
    }

    async fn fetch_tracking(&self, tracking_id: &str) -> Result<TrackingSnapshot, CourierError> {
        if guard(&self.broken_tracking).contains(tracking_id) {
            return Err(CourierError::Unavailable(format!("tracking lookup failed for {}", tracking_id)));
        }

        let status = guard(&self.tracking)
            .get(tracking_id)
            .cloned()
            .ok_or_else(|| CourierError::Rejected(format!("unknown order {}", tracking_id)))?;

        Ok(TrackingSnapshot {
            provider_status: status.clone(),
            events: vec![TrackingUpdate {
                provider_status: status,
                description: None,
                occurred_at: Some(Utc::now()),
            }],
        })
    }

    async fn quote(&self, _request: &QuoteRequest) -> Result<Decimal, CourierError> {
        if let Some(delay) = self.quote_delay {
            tokio::time::sleep(delay).await;
        }
        self.quote
            .ok_or_else(|| CourierError::Unavailable("mock courier has no quote".to_string()))
    }
}

/// Succeeds with `mock_refund_<n>` unless told to fail.
#[derive(Default)]
pub struct MockRefundConnector {
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl MockRefundConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let connector = Self::default();
        connector.set_failing(true);
        connector
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RefundConnector for MockRefundConnector {
    async fn refund(
        &self,
        order_external_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<RefundReceipt, RefundError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if self.fail.load(Ordering::SeqCst) {
            return Err(RefundError {
                message: "HTTP 500: payment gateway declined the refund".to_string(),
                raw: json!({"code": "refund_failed", "message": "HTTP 500: payment gateway declined the refund"}),
            });
        }

        Ok(RefundReceipt {
            id: format!("mock_refund_{}", n),
            status: "completed".to_string(),
            currency: "NGN".to_string(),
            amount,
            raw: json!({"order": order_external_id, "amount": amount.to_string(), "reason": reason}),
        })
    }
}
