use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub id: String,
    pub status: String,
    pub currency: String,
    pub amount: Decimal,
    pub raw: Value,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct RefundError {
    pub message: String,
    /// Whatever the backend sent back, kept for the return record.
    pub raw: Value,
}

impl RefundError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            raw: Value::String(message.clone()),
            message,
        }
    }
}

/// Issues refunds against the commerce backend.
#[async_trait]
pub trait RefundConnector: Send + Sync {
    async fn refund(
        &self,
        order_external_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<RefundReceipt, RefundError>;
}
