pub mod classifier;
pub mod courier;
pub mod events;
pub mod locks;
pub mod refund;
pub mod repository;
pub mod status_map;

pub use courier::{CourierAdapter, CourierEnv, CourierError};
pub use events::EventPublisher;
pub use locks::{RateLimiter, ShipmentLocks};
pub use refund::{RefundConnector, RefundError, RefundReceipt};
pub use repository::{CatalogRepository, InsertOutcome, OrderRepository, ReturnRepository};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Return window exceeded: order is {age_days} days old, window is {window_days} days")]
    WindowExceeded { window_days: i64, age_days: i64 },
    #[error("Courier unavailable: {0}")]
    CourierUnavailable(String),
    #[error("Refund failed: {0}")]
    RefundFailed(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<CourierError> for CoreError {
    fn from(err: CourierError) -> Self {
        CoreError::CourierUnavailable(err.to_string())
    }
}
