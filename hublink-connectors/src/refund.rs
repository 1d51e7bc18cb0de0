use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info};

use hublink_core::refund::{RefundConnector, RefundError, RefundReceipt};
use hublink_shared::money::decimal_from_value;

#[derive(Debug, Clone)]
pub struct CommerceSettings {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub currency: String,
    pub request_timeout: Duration,
}

/// Refunds through the store's REST API (`/wp-json/wc/v3/orders/{id}/refunds`).
pub struct HttpRefundConnector {
    client: reqwest::Client,
    settings: CommerceSettings,
}

impl HttpRefundConnector {
    pub fn new(settings: CommerceSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self { client, settings })
    }

    fn refunds_url(&self, order_external_id: &str) -> String {
        format!(
            "{}/wp-json/wc/v3/orders/{}/refunds",
            self.settings.base_url.trim_end_matches('/'),
            order_external_id
        )
    }
}

pub(crate) fn parse_receipt(body: Value, fallback_currency: &str, requested: Decimal) -> Result<RefundReceipt, RefundError> {
    let id = match body.get("id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => {
            return Err(RefundError {
                message: "refund response without id".to_string(),
                raw: body,
            })
        }
    };

    let amount = body
        .get("amount")
        .and_then(decimal_from_value)
        .unwrap_or(requested);
    let currency = body
        .get("currency")
        .and_then(Value::as_str)
        .unwrap_or(fallback_currency)
        .to_string();
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("completed")
        .to_string();

    Ok(RefundReceipt {
        id,
        status,
        currency,
        amount,
        raw: body,
    })
}

#[async_trait]
impl RefundConnector for HttpRefundConnector {
    async fn refund(
        &self,
        order_external_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<RefundReceipt, RefundError> {
        let response = self
            .client
            .post(self.refunds_url(order_external_id))
            .basic_auth(&self.settings.consumer_key, Some(&self.settings.consumer_secret))
            .json(&json!({
                "amount": amount.round_dp(2).to_string(),
                "reason": reason,
                "api_refund": true,
            }))
            .send()
            .await
            .map_err(|e| RefundError::new(format!("refund request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RefundError::new(format!("refund response unreadable: {}", e)))?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));

        if !status.is_success() {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("refund rejected with HTTP {}", status));
            error!(order = order_external_id, %status, "Refund rejected: {}", message);
            return Err(RefundError { message, raw: body });
        }

        let receipt = parse_receipt(body, &self.settings.currency, amount)?;
        info!(order = order_external_id, refund_id = %receipt.id, "Refund issued");
        Ok(receipt)
    }
}
