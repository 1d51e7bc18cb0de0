use async_trait::async_trait;
use hublink_shared::models::events::DomainEvent;
use tracing::{info, warn};

use crate::CoreResult;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> CoreResult<()>;
}

/// Writes events to the log only. Used when no broker is configured.
pub struct TracingPublisher;

#[async_trait]
impl EventPublisher for TracingPublisher {
    async fn publish(&self, event: &DomainEvent) -> CoreResult<()> {
        info!(topic = event.topic(), key = %event.key(), "domain event: {:?}", event);
        Ok(())
    }
}

/// Publication never fails the operation that produced the event.
pub async fn publish_quietly(publisher: &dyn EventPublisher, event: DomainEvent) {
    if let Err(e) = publisher.publish(&event).await {
        warn!(topic = event.topic(), "Failed to publish event: {}", e);
    }
}
