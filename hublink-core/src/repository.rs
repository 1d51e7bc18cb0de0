use async_trait::async_trait;
use uuid::Uuid;

use hublink_catalog::Catalog;
use hublink_shared::{
    Order, OrderStatus, ReturnRequest, ReturnShipment, ReturnStatus, SubOrder, SubOrderStatus,
    TrackingEvent,
};

use crate::CoreResult;

/// Result of an insert keyed on a natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Uuid),
    /// A row with the same natural key was already there; carries its id.
    Existing(Uuid),
}

impl InsertOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            InsertOutcome::Inserted(id) | InsertOutcome::Existing(id) => *id,
        }
    }
}

/// Orders, sub-orders and their tracking log.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_order_by_external_id(&self, external_id: &str) -> CoreResult<Option<Order>>;

    async fn get_order(&self, id: Uuid) -> CoreResult<Option<Order>>;

    /// Insert unless an order with the same external id exists.
    async fn insert_order(&self, order: &Order) -> CoreResult<InsertOutcome>;

    /// Insert unless a sub-order for the same (order, hub) exists.
    async fn insert_sub_order(&self, sub_order: &SubOrder) -> CoreResult<InsertOutcome>;

    async fn get_sub_order(&self, id: Uuid) -> CoreResult<Option<SubOrder>>;

    async fn find_sub_order_by_tracking(&self, tracking_number: &str) -> CoreResult<Option<SubOrder>>;

    async fn list_sub_orders(&self, order_id: Uuid) -> CoreResult<Vec<SubOrder>>;

    /// Sub-orders with a tracking number that have not reached a terminal status.
    async fn list_trackable_sub_orders(&self) -> CoreResult<Vec<SubOrder>>;

    /// Store the courier booking and move `pending -> assigned`.
    /// Returns false when the sub-order already had a tracking number.
    async fn record_shipment(
        &self,
        sub_order_id: Uuid,
        courier_order_id: &str,
        tracking_number: &str,
    ) -> CoreResult<bool>;

    /// Compare-and-set on status. Returns false when the current status is not `from`.
    async fn update_sub_order_status(
        &self,
        sub_order_id: Uuid,
        from: SubOrderStatus,
        to: SubOrderStatus,
    ) -> CoreResult<bool>;

    async fn set_order_status(&self, order_id: Uuid, status: OrderStatus) -> CoreResult<()>;

    async fn append_tracking_event(&self, event: &TrackingEvent) -> CoreResult<()>;

    async fn list_tracking_events(&self, sub_order_id: Uuid) -> CoreResult<Vec<TrackingEvent>>;
}

/// Return requests and their shipments.
#[async_trait]
pub trait ReturnRepository: Send + Sync {
    /// Request and its first shipment are written together.
    async fn insert_return(&self, request: &ReturnRequest, shipment: &ReturnShipment) -> CoreResult<()>;

    async fn get_return(&self, id: Uuid) -> CoreResult<Option<ReturnRequest>>;

    /// Latest request for the order that is not closed.
    async fn find_open_return_for_order(&self, order_id: Uuid) -> CoreResult<Option<ReturnRequest>>;

    /// Writes every mutable field of the request, conditional on the stored
    /// status still being `expected`. Returns false on a lost race.
    async fn update_return(&self, request: &ReturnRequest, expected: ReturnStatus) -> CoreResult<bool>;

    /// Most recent shipment of the request.
    async fn get_return_shipment(&self, return_request_id: Uuid) -> CoreResult<Option<ReturnShipment>>;

    async fn find_return_shipment_by_tracking(&self, tracking_id: &str) -> CoreResult<Option<ReturnShipment>>;

    /// Copies the request's stored status onto its most recent shipment in one
    /// step, so a late caller can never write an older status. Returns the
    /// status written, `None` when the request has no shipment.
    async fn mirror_return_status(&self, return_request_id: Uuid) -> CoreResult<Option<ReturnStatus>>;

    async fn set_return_shipment_tracking(
        &self,
        shipment_id: Uuid,
        tracking_id: &str,
        courier_order_id: Option<&str>,
    ) -> CoreResult<()>;

    /// Shipments with a tracking id whose courier leg is not finished.
    async fn list_unresolved_return_shipments(&self) -> CoreResult<Vec<ReturnShipment>>;
}

/// Hubs, couriers, zones and rates.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn load_catalog(&self) -> CoreResult<Catalog>;
}
