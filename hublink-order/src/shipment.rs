//! Sub-order lifecycle: courier booking and courier-driven status updates.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hublink_core::courier::{ShipmentParty, ShipmentRequest};
use hublink_core::events::{publish_quietly, EventPublisher};
use hublink_core::locks::{self, shipment_key, ShipmentLocks};
use hublink_core::repository::{CatalogRepository, OrderRepository};
use hublink_core::{CoreError, CoreResult, CourierAdapter};
use hublink_shared::models::events::{DomainEvent, OrderDeliveredEvent, SubOrderStatusChangedEvent};
use hublink_shared::{Order, OrderStatus, SubOrder, SubOrderStatus, TrackingEvent, TrackingSource};

pub(crate) const LOCK_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub sub_order: SubOrder,
    /// False when the sub-order already had a shipment.
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Applied { from: SubOrderStatus, to: SubOrderStatus },
    /// Same status as stored; redelivery.
    Unchanged,
    Ignored { reason: String },
    UnknownTracking,
}

pub struct ShipmentService {
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn CatalogRepository>,
    courier: Arc<dyn CourierAdapter>,
    locks: Arc<dyn ShipmentLocks>,
    events: Arc<dyn EventPublisher>,
    lock_ttl_seconds: u64,
}

impl ShipmentService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn CatalogRepository>,
        courier: Arc<dyn CourierAdapter>,
        locks: Arc<dyn ShipmentLocks>,
        events: Arc<dyn EventPublisher>,
        lock_ttl_seconds: u64,
    ) -> Self {
        Self {
            orders,
            catalog,
            courier,
            locks,
            events,
            lock_ttl_seconds,
        }
    }

    pub fn courier(&self) -> &Arc<dyn CourierAdapter> {
        &self.courier
    }

    /// Create the courier shipment for a pending sub-order.
    /// A sub-order that already has a tracking number is returned unchanged.
    pub async fn dispatch(&self, sub_order_id: Uuid) -> CoreResult<DispatchOutcome> {
        let key = shipment_key(&format!("dispatch-{}", sub_order_id));
        let owner = locks::acquire(self.locks.as_ref(), &key, self.lock_ttl_seconds, LOCK_WAIT)
            .await?
            .ok_or_else(|| CoreError::ValidationError(format!("sub-order {} is being dispatched", sub_order_id)))?;

        let result = self.dispatch_locked(sub_order_id).await;

        if let Err(e) = self.locks.release(&key, &owner).await {
            warn!(%sub_order_id, "Failed to release dispatch lock: {}", e);
        }
        result
    }

    async fn dispatch_locked(&self, sub_order_id: Uuid) -> CoreResult<DispatchOutcome> {
        let sub_order = self.require_sub_order(sub_order_id).await?;

        if sub_order.tracking_number.is_some() {
            debug!(%sub_order_id, "Sub-order already has a shipment");
            return Ok(DispatchOutcome { sub_order, created: false });
        }
        if sub_order.status != SubOrderStatus::Pending {
            return Err(CoreError::ValidationError(format!(
                "sub-order {} is {}, only pending sub-orders can be dispatched",
                sub_order_id, sub_order.status
            )));
        }

        let order = self
            .orders
            .get_order(sub_order.order_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("order {}", sub_order.order_id)))?;
        let catalog = self.catalog.load_catalog().await?;
        let hub = catalog
            .hub(sub_order.hub_id)
            .ok_or_else(|| CoreError::NotFound(format!("hub {}", sub_order.hub_id)))?;

        let request = ShipmentRequest {
            reference: sub_order.id.to_string(),
            sender: ShipmentParty {
                name: hub.name.clone(),
                phone: hub.phone.clone(),
                email: None,
                address: hub.address.clone(),
                city: hub.city.clone(),
                state: hub.state.clone(),
            },
            recipient: recipient(&order),
            description: sub_order
                .items
                .iter()
                .map(|i| format!("{} x{}", i.name, i.quantity))
                .collect::<Vec<_>>()
                .join(", "),
            quantity: sub_order.items.iter().map(|i| i.quantity).sum(),
            weight: sub_order.total_weight,
            value: sub_order.items_total,
        };

        let created = self.courier.create_shipment(&request).await.map_err(|e| {
            error!(%sub_order_id, "Courier shipment creation failed: {}", e);
            CoreError::from(e)
        })?;

        let recorded = self
            .orders
            .record_shipment(sub_order_id, &created.external_order_id, &created.tracking_id)
            .await?;
        if !recorded {
            warn!(%sub_order_id, "Shipment recorded concurrently, keeping the stored one");
            let current = self.require_sub_order(sub_order_id).await?;
            return Ok(DispatchOutcome { sub_order: current, created: false });
        }

        let mut event = TrackingEvent::new(sub_order_id, SubOrderStatus::Assigned, TrackingSource::System)
            .with_provider_status("created");
        if created.ambiguous {
            event = event.with_description("courier answered with an error envelope carrying an order number");
        }
        if let Err(e) = self.orders.append_tracking_event(&event).await {
            error!(%sub_order_id, "Failed to append tracking event: {}", e);
        }

        info!(%sub_order_id, tracking = %created.tracking_id, "Sub-order assigned to courier");
        self.publish_change(&sub_order, SubOrderStatus::Pending, SubOrderStatus::Assigned, Some(created.tracking_id.clone()))
            .await;

        let current = self.require_sub_order(sub_order_id).await?;
        Ok(DispatchOutcome { sub_order: current, created: true })
    }

    /// Apply a courier status for `tracking_number`, serialized per shipment.
    pub async fn apply_courier_update(
        &self,
        tracking_number: &str,
        provider_status: &str,
        description: Option<&str>,
        source: TrackingSource,
    ) -> CoreResult<UpdateOutcome> {
        let key = shipment_key(tracking_number);
        let owner = locks::acquire(self.locks.as_ref(), &key, self.lock_ttl_seconds, LOCK_WAIT)
            .await?
            .ok_or_else(|| CoreError::InternalError(format!("shipment {} is locked", tracking_number)))?;

        let result = self
            .apply_locked(tracking_number, provider_status, description, source)
            .await;

        if let Err(e) = self.locks.release(&key, &owner).await {
            warn!(tracking = tracking_number, "Failed to release shipment lock: {}", e);
        }
        result
    }

    async fn apply_locked(
        &self,
        tracking_number: &str,
        provider_status: &str,
        description: Option<&str>,
        source: TrackingSource,
    ) -> CoreResult<UpdateOutcome> {
        let Some(sub_order) = self.orders.find_sub_order_by_tracking(tracking_number).await? else {
            return Ok(UpdateOutcome::UnknownTracking);
        };

        let from = sub_order.status;
        let to = self.courier.map_status(provider_status);

        if from == to {
            return Ok(UpdateOutcome::Unchanged);
        }
        if from.is_terminal() {
            info!(tracking = tracking_number, %from, provider_status, "Update for a finished sub-order ignored");
            return Ok(UpdateOutcome::Ignored {
                reason: format!("sub-order is already {}", from),
            });
        }
        if !from.can_transition_to(to) {
            info!(tracking = tracking_number, %from, %to, "Backward or invalid courier update ignored");
            return Ok(UpdateOutcome::Ignored {
                reason: format!("{} -> {} is not a forward move", from, to),
            });
        }

        if !self.orders.update_sub_order_status(sub_order.id, from, to).await? {
            return Ok(UpdateOutcome::Ignored {
                reason: "status changed concurrently".to_string(),
            });
        }

        let mut event = TrackingEvent::new(sub_order.id, to, source).with_provider_status(provider_status);
        if let Some(description) = description {
            event = event.with_description(description);
        }
        if let Err(e) = self.orders.append_tracking_event(&event).await {
            error!(sub_order_id = %sub_order.id, "Failed to append tracking event: {}", e);
        }

        info!(tracking = tracking_number, %from, %to, source = source.as_str(), "Sub-order status updated");
        self.publish_change(&sub_order, from, to, Some(tracking_number.to_string())).await;
        self.refresh_order_status(sub_order.order_id).await?;

        Ok(UpdateOutcome::Applied { from, to })
    }

    /// Marks the order delivered once every sub-order is delivered or cancelled.
    pub async fn refresh_order_status(&self, order_id: Uuid) -> CoreResult<OrderStatus> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("order {}", order_id)))?;
        if order.overall_status == OrderStatus::Delivered {
            return Ok(OrderStatus::Delivered);
        }

        let sub_orders = self.orders.list_sub_orders(order_id).await?;
        let settled = !sub_orders.is_empty() && sub_orders.iter().all(|s| s.status.is_settled());
        if !settled {
            return Ok(order.overall_status);
        }

        self.orders.set_order_status(order_id, OrderStatus::Delivered).await?;
        info!(%order_id, external_id = %order.external_id, "All sub-orders settled, order delivered");
        publish_quietly(
            self.events.as_ref(),
            DomainEvent::OrderDelivered(OrderDeliveredEvent {
                order_id,
                external_id: order.external_id.clone(),
                timestamp: Utc::now().timestamp(),
            }),
        )
        .await;

        Ok(OrderStatus::Delivered)
    }

    async fn require_sub_order(&self, id: Uuid) -> CoreResult<SubOrder> {
        self.orders
            .get_sub_order(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("sub-order {}", id)))
    }

    async fn publish_change(
        &self,
        sub_order: &SubOrder,
        from: SubOrderStatus,
        to: SubOrderStatus,
        tracking_number: Option<String>,
    ) {
        publish_quietly(
            self.events.as_ref(),
            DomainEvent::SubOrderStatusChanged(SubOrderStatusChangedEvent {
                order_id: sub_order.order_id,
                sub_order_id: sub_order.id,
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
                tracking_number,
                timestamp: Utc::now().timestamp(),
            }),
        )
        .await;
    }
}

fn recipient(order: &Order) -> ShipmentParty {
    ShipmentParty {
        name: order.customer_name.clone(),
        phone: order.customer_phone.as_ref().map(|p| p.expose().clone()),
        email: Some(order.customer_email.expose().clone()),
        address: order.shipping_address.clone(),
        city: order.shipping_city.clone(),
        state: order.shipping_state.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;

    async fn dispatched(h: &Harness, external_id: &str) -> (Uuid, Vec<SubOrder>) {
        let outcome = h.gateway.ingest(&h.payload(external_id)).await.unwrap();
        let mut subs = Vec::new();
        for id in outcome.sub_order_ids {
            subs.push(h.shipments.dispatch(id).await.unwrap().sub_order);
        }
        (outcome.order_id, subs)
    }

    #[tokio::test]
    async fn test_dispatch_is_idempotent() {
        let h = Harness::new();
        let outcome = h.gateway.ingest(&h.payload("wc-100")).await.unwrap();
        let id = outcome.sub_order_ids[0];

        let first = h.shipments.dispatch(id).await.unwrap();
        assert!(first.created);
        assert_eq!(first.sub_order.status, SubOrderStatus::Assigned);

        let second = h.shipments.dispatch(id).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.sub_order.tracking_number, first.sub_order.tracking_number);
        assert_eq!(h.courier.booking_count(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_failure_leaves_pending() {
        let h = Harness::new();
        let outcome = h.gateway.ingest(&h.payload("wc-101")).await.unwrap();
        h.courier.fail_bookings(true);

        let err = h.shipments.dispatch(outcome.sub_order_ids[0]).await.unwrap_err();
        assert!(matches!(err, CoreError::CourierUnavailable(_)));

        let sub = h.store.get_sub_order(outcome.sub_order_ids[0]).await.unwrap().unwrap();
        assert_eq!(sub.status, SubOrderStatus::Pending);
        assert!(sub.tracking_number.is_none());
    }

    #[tokio::test]
    async fn test_ambiguous_booking_counts_as_created() {
        let h = Harness::new();
        let outcome = h.gateway.ingest(&h.payload("wc-102")).await.unwrap();
        h.courier.ambiguous_bookings(true);

        let dispatched = h.shipments.dispatch(outcome.sub_order_ids[0]).await.unwrap();
        assert!(dispatched.created);
        assert_eq!(dispatched.sub_order.status, SubOrderStatus::Assigned);
    }

    #[tokio::test]
    async fn test_webhook_lifecycle_and_order_aggregate() {
        let h = Harness::new();
        let (order_id, subs) = dispatched(&h, "wc-103").await;
        assert_eq!(subs.len(), 2);
        let t1 = subs[0].tracking_number.clone().unwrap();
        let t2 = subs[1].tracking_number.clone().unwrap();

        let applied = h
            .shipments
            .apply_courier_update(&t1, "Dispatched", Some("left hub"), TrackingSource::Webhook)
            .await
            .unwrap();
        assert_eq!(
            applied,
            UpdateOutcome::Applied { from: SubOrderStatus::Assigned, to: SubOrderStatus::InTransit }
        );

        // Redelivery is a no-op.
        let again = h
            .shipments
            .apply_courier_update(&t1, "Dispatched", None, TrackingSource::Webhook)
            .await
            .unwrap();
        assert_eq!(again, UpdateOutcome::Unchanged);

        h.shipments
            .apply_courier_update(&t1, "Delivered", None, TrackingSource::Webhook)
            .await
            .unwrap();
        let order = h.store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.overall_status, OrderStatus::Processing);

        h.shipments
            .apply_courier_update(&t2, "Cancelled", None, TrackingSource::Reconciliation)
            .await
            .unwrap();
        let order = h.store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.overall_status, OrderStatus::Delivered);

        // Assigned (dispatch), in transit, delivered.
        let log = h.store.list_tracking_events(subs[0].id).await.unwrap();
        let statuses: Vec<_> = log.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                SubOrderStatus::Pending,
                SubOrderStatus::Assigned,
                SubOrderStatus::InTransit,
                SubOrderStatus::Delivered
            ]
        );
        assert_eq!(log[2].description.as_deref(), Some("left hub"));
        assert!(h.events.topics().await.contains("order.delivered"));
    }

    #[tokio::test]
    async fn test_unknown_status_maps_to_processing() {
        let h = Harness::new();
        let (_, subs) = dispatched(&h, "wc-104").await;
        let tracking = subs[0].tracking_number.clone().unwrap();

        let outcome = h
            .shipments
            .apply_courier_update(&tracking, "Held at customs (weather)", None, TrackingSource::Webhook)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome::Applied { from: SubOrderStatus::Assigned, to: SubOrderStatus::Processing }
        );
    }

    #[tokio::test]
    async fn test_terminal_and_backward_updates_are_ignored() {
        let h = Harness::new();
        let (_, subs) = dispatched(&h, "wc-105").await;
        let tracking = subs[0].tracking_number.clone().unwrap();

        h.shipments
            .apply_courier_update(&tracking, "Out for delivery", None, TrackingSource::Webhook)
            .await
            .unwrap();
        let backward = h
            .shipments
            .apply_courier_update(&tracking, "In Transit", None, TrackingSource::Webhook)
            .await
            .unwrap();
        assert!(matches!(backward, UpdateOutcome::Ignored { .. }));

        h.shipments
            .apply_courier_update(&tracking, "Delivered", None, TrackingSource::Webhook)
            .await
            .unwrap();
        let after_terminal = h
            .shipments
            .apply_courier_update(&tracking, "Returned", None, TrackingSource::Webhook)
            .await
            .unwrap();
        assert!(matches!(after_terminal, UpdateOutcome::Ignored { .. }));

        let sub = h.store.get_sub_order(subs[0].id).await.unwrap().unwrap();
        assert_eq!(sub.status, SubOrderStatus::Delivered);
    }

    #[tokio::test]
    async fn test_unknown_tracking_is_not_an_error() {
        let h = Harness::new();
        let outcome = h
            .shipments
            .apply_courier_update("NOPE-1", "Delivered", None, TrackingSource::Webhook)
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::UnknownTracking);
    }
}
