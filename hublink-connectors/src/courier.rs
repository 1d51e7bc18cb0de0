//! HTTPS/JSON courier adapter.
//!
//! Endpoints (relative to the environment's base url):
//! `POST /user/authenticate`, `POST /order`, `GET /order/track/{orderNo}`,
//! `POST /order/cost`.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use reqwest::{Method, StatusCode};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use hublink_core::classifier::{classify_create_response, ProviderResponse};
use hublink_core::courier::{
    CourierCredentials, CreatedShipment, QuoteRequest, ReturnPickupRequest, ShipmentParty,
    ShipmentRequest, TrackingSnapshot, TrackingUpdate,
};
use hublink_core::{CourierAdapter, CourierEnv, CourierError};
use hublink_shared::money::decimal_from_value;

#[derive(Debug, Clone)]
pub struct CourierSettings {
    pub environment: CourierEnv,
    pub sandbox_url: String,
    pub live_url: String,
    pub username: String,
    pub password: String,
    pub request_timeout: Duration,
}

impl CourierSettings {
    fn base_url(&self, env: CourierEnv) -> &str {
        match env {
            CourierEnv::Sandbox => self.sandbox_url.trim_end_matches('/'),
            CourierEnv::Live => self.live_url.trim_end_matches('/'),
        }
    }
}

/// Tokens are assumed valid for a day when the provider omits an expiry.
const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

pub struct HttpCourierAdapter {
    client: reqwest::Client,
    settings: CourierSettings,
    tokens: RwLock<HashMap<CourierEnv, CourierCredentials>>,
}

impl HttpCourierAdapter {
    pub fn new(settings: CourierSettings) -> Result<Self, CourierError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| CourierError::Unavailable(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            settings,
            tokens: RwLock::new(HashMap::new()),
        })
    }

    async fn credentials(&self) -> Result<CourierCredentials, CourierError> {
        let env = self.settings.environment;
        {
            let tokens = self.tokens.read().await;
            if let Some(creds) = tokens.get(&env) {
                if !creds.is_expired(Utc::now()) {
                    return Ok(creds.clone());
                }
            }
        }

        let creds = self.authenticate(env).await?;
        self.tokens.write().await.insert(env, creds.clone());
        Ok(creds)
    }

    async fn invalidate(&self) {
        self.tokens.write().await.remove(&self.settings.environment);
    }

    /// Authenticated call. A 401 drops the cached token and retries once.
    async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<(StatusCode, Value), CourierError> {
        let mut retried = false;
        loop {
            let creds = self.credentials().await?;
            let url = format!("{}{}", self.settings.base_url(self.settings.environment), path);

            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&creds.token)
                .header("secret-key", &creds.secret);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .map_err(|e| CourierError::Unavailable(format!("{} {}: {}", method, path, e)))?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !retried {
                warn!("Courier rejected cached token, re-authenticating");
                self.invalidate().await;
                retried = true;
                continue;
            }
            if status == StatusCode::UNAUTHORIZED {
                return Err(CourierError::Unavailable("courier authentication rejected".to_string()));
            }

            let text = response
                .text()
                .await
                .map_err(|e| CourierError::Unavailable(format!("{} {}: {}", method, path, e)))?;
            let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
            return Ok((status, body));
        }
    }

    async fn submit_order(&self, reference: &str, payload: Value) -> Result<CreatedShipment, CourierError> {
        let (status, body) = self.call(Method::POST, "/order", Some(&json!([payload]))).await?;
        interpret_create(status, &body, reference)
    }
}

/// An order number in the body wins over the HTTP status; a 5xx without one is
/// retryable, anything else without one is a rejection.
pub(crate) fn interpret_create(
    status: StatusCode,
    body: &Value,
    reference: &str,
) -> Result<CreatedShipment, CourierError> {
    match classify_create_response(status.is_success(), body, reference) {
        ProviderResponse::Success { id } => {
            info!(reference, order_no = %id, "Courier shipment created");
            Ok(created(id, false))
        }
        ProviderResponse::AmbiguousSuccess { id, message } => {
            warn!(reference, order_no = %id, http_status = %status, "Courier returned an error envelope with an order number ({}), treating as created", message);
            Ok(created(id, true))
        }
        ProviderResponse::Error { message } if status.is_server_error() => Err(CourierError::Unavailable(
            format!("courier returned {}: {}", status, message),
        )),
        ProviderResponse::Error { message } => Err(CourierError::Rejected(message)),
    }
}

fn created(id: String, ambiguous: bool) -> CreatedShipment {
    CreatedShipment {
        external_order_id: id.clone(),
        tracking_id: id,
        ambiguous,
    }
}

fn order_payload(
    reference: &str,
    sender: &ShipmentParty,
    recipient: &ShipmentParty,
    description: &str,
    quantity: u32,
    weight: Decimal,
    value: Decimal,
) -> Value {
    json!({
        "uniqueID": reference,
        "BatchID": reference,
        "recipientName": recipient.name,
        "recipientPhone": recipient.phone,
        "recipientEmail": recipient.email,
        "recipientAddress": format!("{}, {}", recipient.address, recipient.city),
        "recipientState": recipient.state,
        "pickUpAddress": format!("{}, {}", sender.address, sender.city),
        "pickUpState": sender.state,
        "senderName": sender.name,
        "senderPhone": sender.phone,
        "itemDescription": description,
        "quantity": quantity,
        "weight": weight.to_string(),
        "valueOfItem": value.to_string(),
    })
}

/// `{"status": "Success", "authDetails": {"authToken", "expireToken"}, "orgDetails": {"secret-key"}}`
pub(crate) fn parse_credentials(body: &Value, now: DateTime<Utc>) -> Result<CourierCredentials, CourierError> {
    let token = body
        .pointer("/authDetails/authToken")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CourierError::Unavailable(format!("authentication failed: {}", describe(body))))?;

    let secret = body
        .pointer("/orgDetails/secret-key")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let expires_at = body
        .pointer("/authDetails/expireToken")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or_else(|| now + ChronoDuration::hours(DEFAULT_TOKEN_TTL_HOURS));

    Ok(CourierCredentials {
        token: token.to_string(),
        secret: secret.to_string(),
        expires_at: Some(expires_at),
    })
}

/// `{"order": {"orderStatus"}, "history": [{"orderStatus", "statusDescription", "statusCreationDate"}]}`
pub(crate) fn parse_tracking(body: &Value) -> Result<TrackingSnapshot, CourierError> {
    let events: Vec<TrackingUpdate> = body
        .get("history")
        .and_then(Value::as_array)
        .map(|history| {
            history
                .iter()
                .filter_map(|entry| {
                    let provider_status = entry.get("orderStatus").and_then(Value::as_str)?;
                    Some(TrackingUpdate {
                        provider_status: provider_status.to_string(),
                        description: entry
                            .get("statusDescription")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        occurred_at: entry
                            .get("statusCreationDate")
                            .and_then(Value::as_str)
                            .and_then(parse_timestamp),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let provider_status = body
        .pointer("/order/orderStatus")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| events.last().map(|e| e.provider_status.clone()))
        .ok_or_else(|| CourierError::Rejected(format!("tracking response without status: {}", describe(body))))?;

    Ok(TrackingSnapshot { provider_status, events })
}

/// `{"status": "Success", "Cost": {"cost": 4300}}`
pub(crate) fn parse_quote(body: &Value) -> Result<Decimal, CourierError> {
    body.pointer("/Cost/cost")
        .or_else(|| body.get("cost"))
        .and_then(decimal_from_value)
        .filter(|cost| *cost > Decimal::ZERO)
        .ok_or_else(|| CourierError::Unavailable(format!("no quote in response: {}", describe(body))))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn describe(body: &Value) -> String {
    body.get("description")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl CourierAdapter for HttpCourierAdapter {
    async fn authenticate(&self, env: CourierEnv) -> Result<CourierCredentials, CourierError> {
        let url = format!("{}/user/authenticate", self.settings.base_url(env));
        debug!(?env, "Authenticating with courier");

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "user_id": self.settings.username,
                "password": self.settings.password,
            }))
            .send()
            .await
            .map_err(|e| CourierError::Unavailable(format!("authenticate: {}", e)))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| CourierError::Unavailable(format!("authenticate: {}", e)))?;

        if !status.is_success() {
            return Err(CourierError::Unavailable(format!(
                "authentication failed ({}): {}",
                status,
                describe(&body)
            )));
        }

        parse_credentials(&body, Utc::now())
    }

    async fn create_shipment(&self, request: &ShipmentRequest) -> Result<CreatedShipment, CourierError> {
        let payload = order_payload(
            &request.reference,
            &request.sender,
            &request.recipient,
            &request.description,
            request.quantity,
            request.weight,
            request.value,
        );
        self.submit_order(&request.reference, payload).await
    }

    async fn book_return_pickup(&self, request: &ReturnPickupRequest) -> Result<CreatedShipment, CourierError> {
        // Reverse leg: the customer is the pickup point, the hub receives.
        let mut payload = order_payload(
            &request.reference,
            &request.customer,
            &request.hub,
            &request.description,
            1,
            request.weight,
            request.value,
        );
        payload["isReturn"] = json!(true);
        self.submit_order(&request.reference, payload).await
    }

    async fn fetch_tracking(&self, tracking_id: &str) -> Result<TrackingSnapshot, CourierError> {
        let path = format!("/order/track/{}", tracking_id);
        let (status, body) = self.call(Method::GET, &path, None).await?;

        if status.is_server_error() {
            return Err(CourierError::Unavailable(format!("courier returned {}", status)));
        }
        if !status.is_success() {
            return Err(CourierError::Rejected(describe(&body)));
        }

        parse_tracking(&body)
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Decimal, CourierError> {
        let body = json!({
            "state": request.destination_state,
            "pickUpState": request.origin_state,
            "weight": request.weight.to_string(),
        });
        let (status, body) = self.call(Method::POST, "/order/cost", Some(&body)).await?;

        if !status.is_success() {
            return Err(CourierError::Unavailable(format!("quote failed ({}): {}", status, describe(&body))));
        }

        parse_quote(&body)
    }
}
