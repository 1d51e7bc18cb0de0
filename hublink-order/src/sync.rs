//! Periodic pull of courier tracking for shipments that are still moving.
//! Covers events whose webhook never arrived.

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use hublink_core::repository::{OrderRepository, ReturnRepository};
use hublink_core::{CoreResult, CourierAdapter};
use hublink_shared::TrackingSource;

use crate::returns::{ReturnService, ReturnUpdateOutcome};
use crate::shipment::{ShipmentService, UpdateOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub checked: usize,
    pub updated: usize,
    pub failed: usize,
}

enum Target {
    SubOrder(String),
    Return(String),
}

impl Target {
    fn tracking(&self) -> &str {
        match self {
            Target::SubOrder(t) | Target::Return(t) => t,
        }
    }
}

pub struct ReconciliationSync {
    orders: Arc<dyn OrderRepository>,
    returns: Arc<dyn ReturnRepository>,
    courier: Arc<dyn CourierAdapter>,
    shipment_service: Arc<ShipmentService>,
    return_service: Arc<ReturnService>,
    max_concurrency: usize,
}

impl ReconciliationSync {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        returns: Arc<dyn ReturnRepository>,
        courier: Arc<dyn CourierAdapter>,
        shipment_service: Arc<ShipmentService>,
        return_service: Arc<ReturnService>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            orders,
            returns,
            courier,
            shipment_service,
            return_service,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// One pass over every unresolved shipment. A failing item is counted and
    /// logged; the rest of the batch still runs.
    pub async fn run_once(&self) -> CoreResult<SyncReport> {
        let mut targets: Vec<Target> = self
            .orders
            .list_trackable_sub_orders()
            .await?
            .into_iter()
            .filter_map(|s| s.tracking_number.map(Target::SubOrder))
            .collect();
        targets.extend(
            self.returns
                .list_unresolved_return_shipments()
                .await?
                .into_iter()
                .filter_map(|s| s.tracking_id.map(Target::Return)),
        );

        let checked = targets.len();
        let results: Vec<Result<bool, String>> = stream::iter(targets)
            .map(|target| async move { self.reconcile(&target).await })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut report = SyncReport {
            checked,
            ..SyncReport::default()
        };
        for result in results {
            match result {
                Ok(true) => report.updated += 1,
                Ok(false) => {}
                Err(_) => report.failed += 1,
            }
        }

        info!(
            checked = report.checked,
            updated = report.updated,
            failed = report.failed,
            "Reconciliation pass finished"
        );
        Ok(report)
    }

    async fn reconcile(&self, target: &Target) -> Result<bool, String> {
        let tracking = target.tracking();
        let snapshot = self.courier.fetch_tracking(tracking).await.map_err(|e| {
            warn!(tracking, "Tracking lookup failed: {}", e);
            e.to_string()
        })?;
        debug!(tracking, status = %snapshot.provider_status, "Fetched courier status");

        let updated = match target {
            Target::SubOrder(_) => self
                .shipment_service
                .apply_courier_update(tracking, &snapshot.provider_status, None, TrackingSource::Reconciliation)
                .await
                .map(|outcome| matches!(outcome, UpdateOutcome::Applied { .. })),
            Target::Return(_) => self
                .return_service
                .apply_courier_update(tracking, &snapshot.provider_status)
                .await
                .map(|outcome| matches!(outcome, ReturnUpdateOutcome::Applied { .. })),
        };

        updated.map_err(|e| {
            warn!(tracking, "Reconciliation update failed: {}", e);
            e.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::returns::CreateReturn;
    use crate::test_support::Harness;
    use hublink_core::repository::{OrderRepository, ReturnRepository};
    use hublink_shared::models::events::DomainEvent;
    use hublink_shared::{ResolutionPreference, ReturnMethod, ReturnStatus, SubOrderStatus, TrackingSource};
    use uuid::Uuid;

    fn pickup_return(order_id: Uuid) -> CreateReturn {
        CreateReturn {
            order_id,
            customer_id: None,
            customer_email: Some("ada@example.com".to_string()),
            method: ReturnMethod::Pickup,
            resolution: ResolutionPreference::Refund,
            reason: "Wrong size".to_string(),
            evidence: vec![],
            hub_id: None,
            pickup_address: Some("4 Ring Rd".to_string()),
            pickup_city: Some("Ibadan".to_string()),
            pickup_state: Some("Oyo".to_string()),
        }
    }

    #[tokio::test]
    async fn test_sync_applies_missed_updates() {
        let h = Harness::builder().auto_dispatch(true).build();
        let outcome = h.gateway.ingest(&h.payload("s-1")).await.unwrap();
        let subs = h.store.list_sub_orders(outcome.order_id).await.unwrap();
        let t1 = subs[0].tracking_number.clone().unwrap();
        h.courier.set_tracking_status(&t1, "In Transit");

        let report = h.sync.run_once().await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, 0);

        let sub = h.store.get_sub_order(subs[0].id).await.unwrap().unwrap();
        assert_eq!(sub.status, SubOrderStatus::InTransit);
        let log = h.store.list_tracking_events(sub.id).await.unwrap();
        assert_eq!(log.last().unwrap().source.as_str(), "reconciliation");
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let h = Harness::builder().auto_dispatch(true).build();
        let outcome = h.gateway.ingest(&h.payload("s-2")).await.unwrap();
        let subs = h.store.list_sub_orders(outcome.order_id).await.unwrap();
        let broken = subs[0].tracking_number.clone().unwrap();
        let healthy = subs[1].tracking_number.clone().unwrap();
        h.courier.break_tracking(&broken);
        h.courier.set_tracking_status(&healthy, "Delivered");

        let report = h.sync.run_once().await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.updated, 1);

        let sub = h.store.get_sub_order(subs[1].id).await.unwrap().unwrap();
        assert_eq!(sub.status, SubOrderStatus::Delivered);
    }

    #[tokio::test]
    async fn test_sync_moves_return_shipments() {
        let h = Harness::new();
        let outcome = h.gateway.ingest(&h.payload("s-3")).await.unwrap();
        let request = h.returns.create(pickup_return(outcome.order_id)).await.unwrap();
        let tracking = h.store.get_return_shipment(request.id).await.unwrap().unwrap().tracking_id.unwrap();
        h.courier.set_tracking_status(&tracking, "Delivered");

        let report = h.sync.run_once().await.unwrap();
        assert_eq!(report.updated, 1);

        let stored = h.store.get_return(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReturnStatus::DeliveredToHub);
        let shipment = h.store.get_return_shipment(request.id).await.unwrap().unwrap();
        assert_eq!(shipment.status, ReturnStatus::DeliveredToHub);
    }

    #[tokio::test]
    async fn test_webhook_and_sync_on_same_sub_order_apply_once() {
        let h = Harness::builder().auto_dispatch(true).build();
        let outcome = h.gateway.ingest(&h.payload("s-4")).await.unwrap();
        let subs = h.store.list_sub_orders(outcome.order_id).await.unwrap();
        let tracking = subs[0].tracking_number.clone().unwrap();
        h.courier.set_tracking_status(&tracking, "In Transit");

        let (webhook, report) = tokio::join!(
            h.shipments
                .apply_courier_update(&tracking, "In Transit", None, TrackingSource::Webhook),
            h.sync.run_once(),
        );
        webhook.unwrap();
        let report = report.unwrap();
        assert_eq!(report.failed, 0);

        let sub = h.store.get_sub_order(subs[0].id).await.unwrap().unwrap();
        assert_eq!(sub.status, SubOrderStatus::InTransit);
        let in_transit = h
            .store
            .list_tracking_events(sub.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.status == SubOrderStatus::InTransit)
            .count();
        assert_eq!(in_transit, 1);
    }

    #[tokio::test]
    async fn test_webhook_and_sync_on_same_return_apply_once() {
        let h = Harness::new();
        let outcome = h.gateway.ingest(&h.payload("s-5")).await.unwrap();
        let request = h.returns.create(pickup_return(outcome.order_id)).await.unwrap();
        let tracking = h.store.get_return_shipment(request.id).await.unwrap().unwrap().tracking_id.unwrap();
        h.courier.set_tracking_status(&tracking, "Delivered");

        let (webhook, report) = tokio::join!(
            h.returns.apply_courier_update(&tracking, "Delivered"),
            h.sync.run_once(),
        );
        webhook.unwrap();
        assert_eq!(report.unwrap().failed, 0);

        let stored = h.store.get_return(request.id).await.unwrap().unwrap();
        let shipment = h.store.get_return_shipment(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReturnStatus::DeliveredToHub);
        assert_eq!(shipment.status, stored.status);

        let arrivals = h
            .events
            .events()
            .await
            .into_iter()
            .filter(|e| matches!(e, DomainEvent::ReturnStatusChanged(c) if c.to == "delivered_to_hub"))
            .count();
        assert_eq!(arrivals, 1);
    }
}
