use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{error, info, warn};

use hublink_order::{CommerceOrderPayload, IngestOutcome, UpdateOutcome};
use hublink_shared::TrackingSource;

use crate::error::AppError;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-wc-webhook-signature";

type HmacSha256 = Hmac<Sha256>;

pub fn commerce_routes() -> Router<AppState> {
    Router::new().route("/webhooks/commerce/order-created", post(commerce_order_created))
}

/// Never rate limited: anything but a 200 makes the courier redeliver.
pub fn courier_routes() -> Router<AppState> {
    Router::new().route("/webhooks/courier", post(courier_status))
}

/// Base64 HMAC-SHA256 of the raw body, compared in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// POST /webhooks/commerce/order-created
async fn commerce_order_created(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if let Some(secret) = state.webhook_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret, &body, signature) {
            warn!("Order webhook rejected: bad signature");
            return Err(AppError::Unauthorized("invalid webhook signature".to_string()));
        }
    }

    // The store pings a new webhook with a form body before sending orders.
    if body.starts_with(b"webhook_id=") {
        info!("Order webhook ping received");
        return Ok((StatusCode::OK, Json(json!({"acknowledged": true}))));
    }

    let payload: CommerceOrderPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid order payload: {}", e)))?;

    let IngestOutcome { order_id, created, sub_order_ids } = state.gateway.ingest(&payload).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };

    Ok((
        status,
        Json(json!({
            "order_id": order_id,
            "created": created,
            "sub_order_ids": sub_order_ids,
        })),
    ))
}

/// First non-empty value under any of `keys`. Couriers send ids as numbers too.
fn first_str(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match payload.get(*k)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// POST /webhooks/courier
///
/// Always answers 200, otherwise the courier keeps redelivering. Problems are
/// logged for manual follow-up.
async fn courier_status(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let ack = Json(json!({"acknowledged": true}));

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            error!("Courier webhook with unreadable body: {}", e);
            return ack;
        }
    };

    let (Some(tracking), Some(status)) = (
        first_str(&payload, &["orderNo", "tracking_id", "trackingId"]),
        first_str(&payload, &["status", "orderStatus"]),
    ) else {
        error!(payload = %payload, "Courier webhook without tracking id or status");
        return ack;
    };
    let description = first_str(&payload, &["description", "statusDescription"]);
    let (tracking, status) = (tracking.as_str(), status.as_str());

    match state
        .shipments
        .apply_courier_update(tracking, status, description.as_deref(), TrackingSource::Webhook)
        .await
    {
        Ok(UpdateOutcome::UnknownTracking) => match state.returns.apply_courier_update(tracking, status).await {
            Ok(outcome) => info!(tracking, status, ?outcome, "Courier webhook applied to return"),
            Err(e) => error!(tracking, status, "Courier webhook for return failed: {}", e),
        },
        Ok(outcome) => info!(tracking, status, ?outcome, "Courier webhook applied"),
        Err(e) => error!(tracking, status, "Courier webhook failed: {}", e),
    }

    ack
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_first_str_reads_numbers_and_skips_blanks() {
        let payload = json!({"orderNo": 100234, "tracking_id": "  ", "status": " Delivered "});
        assert_eq!(first_str(&payload, &["tracking_id", "orderNo"]).as_deref(), Some("100234"));
        assert_eq!(first_str(&payload, &["status"]).as_deref(), Some("Delivered"));
        assert_eq!(first_str(&payload, &["tracking_id"]), None);
        assert_eq!(first_str(&payload, &["missing"]), None);
    }

    #[test]
    fn test_verify_signature() {
        let body = br#"{"id": 1}"#;
        let signature = sign("s3cret", body);

        assert!(verify_signature("s3cret", body, &signature));
        assert!(!verify_signature("other", body, &signature));
        assert!(!verify_signature("s3cret", br#"{"id": 2}"#, &signature));
        assert!(!verify_signature("s3cret", body, "not base64!"));
    }
}
