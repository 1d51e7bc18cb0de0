use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use hublink_core::events::{publish_quietly, EventPublisher};
use hublink_core::repository::{CatalogRepository, InsertOutcome, OrderRepository};
use hublink_core::CoreResult;
use hublink_shared::models::events::{DomainEvent, OrderIngestedEvent};
use hublink_shared::{Masked, Order, OrderStatus, SubOrder, SubOrderStatus, TrackingEvent, TrackingSource};

use crate::commerce::{CommerceOrderPayload, NormalizedOrder};
use crate::shipment::ShipmentService;
use crate::splitter::{HubShipment, HubSplitter, SplitRequest};

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub order_id: Uuid,
    /// False when the external id was already ingested.
    pub created: bool,
    pub sub_order_ids: Vec<Uuid>,
}

pub struct IngestionGateway {
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn CatalogRepository>,
    splitter: Arc<HubSplitter>,
    shipments: Arc<ShipmentService>,
    events: Arc<dyn EventPublisher>,
    auto_dispatch: bool,
}

impl IngestionGateway {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn CatalogRepository>,
        splitter: Arc<HubSplitter>,
        shipments: Arc<ShipmentService>,
        events: Arc<dyn EventPublisher>,
        auto_dispatch: bool,
    ) -> Self {
        Self {
            orders,
            catalog,
            splitter,
            shipments,
            events,
            auto_dispatch,
        }
    }

    pub async fn ingest(&self, payload: &CommerceOrderPayload) -> CoreResult<IngestOutcome> {
        let normalized = payload.normalize()?;

        if let Some(existing) = self.orders.find_order_by_external_id(&normalized.external_id).await? {
            info!(external_id = %normalized.external_id, order_id = %existing.id, "Order already ingested");
            return self.existing(existing.id).await;
        }

        // Split before writing anything so a bad order leaves no rows behind.
        let catalog = self.catalog.load_catalog().await?;
        let split_request = SplitRequest {
            items: normalized.items.clone(),
            destination_state: normalized.shipping_state.clone(),
            destination_city: normalized.shipping_city.clone(),
            customer_paid_shipping: normalized.shipping_fee_paid,
        };
        let shipments = self.splitter.split(&catalog, &split_request).await?;

        let order = build_order(&normalized);
        let order_id = match self.orders.insert_order(&order).await? {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Existing(id) => {
                info!(external_id = %order.external_id, order_id = %id, "Order inserted concurrently");
                return self.existing(id).await;
            }
        };

        let mut sub_order_ids = Vec::with_capacity(shipments.len());
        for shipment in &shipments {
            let sub_order = build_sub_order(order_id, shipment);
            match self.orders.insert_sub_order(&sub_order).await {
                Ok(outcome) => {
                    let event = TrackingEvent::new(outcome.id(), SubOrderStatus::Pending, TrackingSource::System)
                        .with_description("sub-order created");
                    if let Err(e) = self.orders.append_tracking_event(&event).await {
                        error!(%order_id, sub_order_id = %outcome.id(), "Failed to write initial tracking event: {}", e);
                    }
                    sub_order_ids.push(outcome.id());
                }
                Err(e) => {
                    // The order row stays; redelivery will find it and stop.
                    error!(
                        %order_id,
                        external_id = %order.external_id,
                        hub_id = %shipment.hub_id,
                        "Partial ingestion, sub-order not persisted, needs manual reconciliation: {}",
                        e
                    );
                }
            }
        }

        info!(
            %order_id,
            external_id = %order.external_id,
            sub_orders = sub_order_ids.len(),
            "Order ingested"
        );
        publish_quietly(
            self.events.as_ref(),
            DomainEvent::OrderIngested(OrderIngestedEvent {
                order_id,
                external_id: order.external_id.clone(),
                sub_order_ids: sub_order_ids.clone(),
                timestamp: Utc::now().timestamp(),
            }),
        )
        .await;

        if self.auto_dispatch {
            for id in &sub_order_ids {
                if let Err(e) = self.shipments.dispatch(*id).await {
                    warn!(%order_id, sub_order_id = %id, "Auto-dispatch failed, sub-order stays pending: {}", e);
                }
            }
        }

        Ok(IngestOutcome {
            order_id,
            created: true,
            sub_order_ids,
        })
    }

    async fn existing(&self, order_id: Uuid) -> CoreResult<IngestOutcome> {
        let sub_order_ids = self
            .orders
            .list_sub_orders(order_id)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();

        Ok(IngestOutcome {
            order_id,
            created: false,
            sub_order_ids,
        })
    }
}

fn build_order(normalized: &NormalizedOrder) -> Order {
    let now = Utc::now();
    Order {
        id: Uuid::new_v4(),
        external_id: normalized.external_id.clone(),
        customer_id: normalized.customer_id.clone(),
        customer_name: normalized.customer_name.clone(),
        customer_email: Masked::new(normalized.customer_email.clone()),
        customer_phone: normalized.customer_phone.clone().map(Masked::new),
        shipping_address: normalized.shipping_address.clone(),
        shipping_city: normalized.shipping_city.clone(),
        shipping_state: normalized.shipping_state.clone(),
        subtotal: normalized.subtotal,
        total: normalized.total,
        shipping_fee_paid: normalized.shipping_fee_paid,
        payment_status: normalized.payment_status.clone(),
        overall_status: OrderStatus::Processing,
        created_at: now,
        updated_at: now,
    }
}

fn build_sub_order(order_id: Uuid, shipment: &HubShipment) -> SubOrder {
    let now = Utc::now();
    SubOrder {
        id: Uuid::new_v4(),
        order_id,
        hub_id: shipment.hub_id,
        courier_id: Some(shipment.courier_id),
        items: shipment.items.clone(),
        total_weight: shipment.total_weight,
        items_total: shipment.items_total,
        real_shipping_cost: shipment.real_cost.total,
        shipping_vat: shipment.real_cost.vat,
        allocated_shipping_fee: shipment.allocated_fee,
        shipping_profit_loss: shipment.profit_loss,
        cost_source: shipment.cost_source.as_str().to_string(),
        delivery_timeline: Some(shipment.delivery_timeline.clone()),
        courier_order_id: None,
        tracking_number: None,
        status: SubOrderStatus::Pending,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use hublink_core::CoreError;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_ingest_creates_order_and_sub_orders() {
        let h = Harness::new();
        let outcome = h.gateway.ingest(&h.payload("wc-1")).await.unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.sub_order_ids.len(), 2);

        let order = h.store.get_order(outcome.order_id).await.unwrap().unwrap();
        let subs = h.store.list_sub_orders(outcome.order_id).await.unwrap();
        let items_total: Decimal = subs.iter().map(|s| s.items_total).sum();
        assert_eq!(items_total, order.items_total());

        let allocated: Decimal = subs.iter().map(|s| s.allocated_shipping_fee).sum();
        assert_eq!(allocated, dec!(6000));

        let a = subs.iter().find(|s| s.hub_id == h.fx.hub_a).unwrap();
        assert_eq!(a.real_shipping_cost, dec!(4300));
        assert_eq!(a.shipping_vat, dec!(300));

        for sub in &subs {
            let log = h.store.list_tracking_events(sub.id).await.unwrap();
            assert_eq!(log.len(), 1);
            assert_eq!(log[0].status, SubOrderStatus::Pending);
        }
        assert!(h.events.topics().await.contains("order.ingested"));
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let h = Harness::new();
        let first = h.gateway.ingest(&h.payload("wc-2")).await.unwrap();
        let second = h.gateway.ingest(&h.payload("wc-2")).await.unwrap();

        assert!(!second.created);
        assert_eq!(second.order_id, first.order_id);
        assert_eq!(second.sub_order_ids.len(), first.sub_order_ids.len());
        assert_eq!(h.store.order_count().await, 1);
        assert_eq!(h.store.sub_order_count().await, 2);
    }

    #[tokio::test]
    async fn test_validation_failure_writes_nothing() {
        let h = Harness::new();
        let mut payload = h.payload("wc-3");
        payload.billing.email.clear();
        payload.shipping.state.clear();
        payload.billing.state.clear();

        match h.gateway.ingest(&payload).await {
            Err(CoreError::ValidationError(msg)) => {
                assert!(msg.contains("billing.email"));
                assert!(msg.contains("shipping.state"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(h.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_unfulfillable_order_writes_nothing() {
        let h = Harness::new();
        let mut payload = h.payload("wc-4");
        for line in payload.line_items.iter_mut() {
            line.meta_data.clear();
        }

        assert!(matches!(h.gateway.ingest(&payload).await, Err(CoreError::ValidationError(_))));
        assert_eq!(h.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_order() {
        let h = Harness::new();
        h.store.fail_sub_order_inserts(true);

        let outcome = h.gateway.ingest(&h.payload("wc-5")).await.unwrap();
        assert!(outcome.created);
        assert!(outcome.sub_order_ids.is_empty());

        // Redelivery does not create a second order.
        h.store.fail_sub_order_inserts(false);
        let again = h.gateway.ingest(&h.payload("wc-5")).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.order_id, outcome.order_id);
        assert_eq!(h.store.order_count().await, 1);
    }

    #[tokio::test]
    async fn test_auto_dispatch() {
        let h = Harness::builder().auto_dispatch(true).build();
        let outcome = h.gateway.ingest(&h.payload("wc-6")).await.unwrap();

        let subs = h.store.list_sub_orders(outcome.order_id).await.unwrap();
        assert!(subs.iter().all(|s| s.status == SubOrderStatus::Assigned));
        assert_eq!(h.courier.booking_count(), 2);
    }
}
