//! In-process repositories with the same conditional-write semantics as the
//! Postgres ones. Used by tests and for running the service without a database.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use hublink_catalog::Catalog;
use hublink_core::events::EventPublisher;
use hublink_core::locks::ShipmentLocks;
use hublink_core::repository::{CatalogRepository, InsertOutcome, OrderRepository, ReturnRepository};
use hublink_core::{CoreError, CoreResult};
use hublink_shared::models::events::DomainEvent;
use hublink_shared::{
    Order, OrderStatus, ReturnRequest, ReturnShipment, ReturnStatus, SubOrder, SubOrderStatus,
    TrackingEvent,
};

#[derive(Default)]
pub struct MemoryStore {
    orders: RwLock<HashMap<Uuid, Order>>,
    sub_orders: RwLock<Vec<SubOrder>>,
    tracking_events: RwLock<Vec<TrackingEvent>>,
    returns: RwLock<HashMap<Uuid, ReturnRequest>>,
    return_shipments: RwLock<Vec<ReturnShipment>>,
    catalog: RwLock<Catalog>,
    fail_sub_order_inserts: AtomicBool,
    fail_shipment_status_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: Catalog) -> Self {
        Self {
            catalog: RwLock::new(catalog),
            ..Self::default()
        }
    }

    pub async fn replace_catalog(&self, catalog: Catalog) {
        *self.catalog.write().await = catalog;
    }

    /// Makes `insert_sub_order` fail, to exercise partial ingestion.
    pub fn fail_sub_order_inserts(&self, fail: bool) {
        self.fail_sub_order_inserts.store(fail, Ordering::SeqCst);
    }

    /// Makes `mirror_return_status` fail.
    pub fn fail_shipment_status_writes(&self, fail: bool) {
        self.fail_shipment_status_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn return_count(&self) -> usize {
        self.returns.read().await.len()
    }

    pub async fn sub_order_count(&self) -> usize {
        self.sub_orders.read().await.len()
    }

    /// Test setup: overwrite an order as-is (e.g. to backdate it).
    pub async fn put_order(&self, order: Order) {
        self.orders.write().await.insert(order.id, order);
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn find_order_by_external_id(&self, external_id: &str) -> CoreResult<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.values().find(|o| o.external_id == external_id).cloned())
    }

    async fn get_order(&self, id: Uuid) -> CoreResult<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn insert_order(&self, order: &Order) -> CoreResult<InsertOutcome> {
        let mut orders = self.orders.write().await;
        if let Some(existing) = orders.values().find(|o| o.external_id == order.external_id) {
            return Ok(InsertOutcome::Existing(existing.id));
        }
        orders.insert(order.id, order.clone());
        Ok(InsertOutcome::Inserted(order.id))
    }

    async fn insert_sub_order(&self, sub_order: &SubOrder) -> CoreResult<InsertOutcome> {
        if self.fail_sub_order_inserts.load(Ordering::SeqCst) {
            return Err(CoreError::StorageError("sub_orders unavailable".to_string()));
        }

        let mut sub_orders = self.sub_orders.write().await;
        if let Some(existing) = sub_orders
            .iter()
            .find(|s| s.order_id == sub_order.order_id && s.hub_id == sub_order.hub_id)
        {
            return Ok(InsertOutcome::Existing(existing.id));
        }
        sub_orders.push(sub_order.clone());
        Ok(InsertOutcome::Inserted(sub_order.id))
    }

    async fn get_sub_order(&self, id: Uuid) -> CoreResult<Option<SubOrder>> {
        let sub_orders = self.sub_orders.read().await;
        Ok(sub_orders.iter().find(|s| s.id == id).cloned())
    }

    async fn find_sub_order_by_tracking(&self, tracking_number: &str) -> CoreResult<Option<SubOrder>> {
        let sub_orders = self.sub_orders.read().await;
        Ok(sub_orders
            .iter()
            .find(|s| s.tracking_number.as_deref() == Some(tracking_number))
            .cloned())
    }

    async fn list_sub_orders(&self, order_id: Uuid) -> CoreResult<Vec<SubOrder>> {
        let sub_orders = self.sub_orders.read().await;
        Ok(sub_orders.iter().filter(|s| s.order_id == order_id).cloned().collect())
    }

    async fn list_trackable_sub_orders(&self) -> CoreResult<Vec<SubOrder>> {
        let sub_orders = self.sub_orders.read().await;
        Ok(sub_orders
            .iter()
            .filter(|s| s.tracking_number.is_some() && !s.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn record_shipment(
        &self,
        sub_order_id: Uuid,
        courier_order_id: &str,
        tracking_number: &str,
    ) -> CoreResult<bool> {
        let mut sub_orders = self.sub_orders.write().await;
        let sub_order = sub_orders
            .iter_mut()
            .find(|s| s.id == sub_order_id)
            .ok_or_else(|| CoreError::NotFound(format!("sub-order {}", sub_order_id)))?;

        if sub_order.tracking_number.is_some() {
            return Ok(false);
        }
        sub_order.courier_order_id = Some(courier_order_id.to_string());
        sub_order.tracking_number = Some(tracking_number.to_string());
        sub_order.status = SubOrderStatus::Assigned;
        sub_order.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_sub_order_status(
        &self,
        sub_order_id: Uuid,
        from: SubOrderStatus,
        to: SubOrderStatus,
    ) -> CoreResult<bool> {
        let mut sub_orders = self.sub_orders.write().await;
        match sub_orders.iter_mut().find(|s| s.id == sub_order_id) {
            Some(sub_order) if sub_order.status == from => {
                sub_order.status = to;
                sub_order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_order_status(&self, order_id: Uuid, status: OrderStatus) -> CoreResult<()> {
        if let Some(order) = self.orders.write().await.get_mut(&order_id) {
            order.overall_status = status;
            order.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn append_tracking_event(&self, event: &TrackingEvent) -> CoreResult<()> {
        self.tracking_events.write().await.push(event.clone());
        Ok(())
    }

    async fn list_tracking_events(&self, sub_order_id: Uuid) -> CoreResult<Vec<TrackingEvent>> {
        let events = self.tracking_events.read().await;
        Ok(events.iter().filter(|e| e.sub_order_id == sub_order_id).cloned().collect())
    }
}

#[async_trait]
impl ReturnRepository for MemoryStore {
    async fn insert_return(&self, request: &ReturnRequest, shipment: &ReturnShipment) -> CoreResult<()> {
        let mut returns = self.returns.write().await;
        let mut shipments = self.return_shipments.write().await;
        returns.insert(request.id, request.clone());
        shipments.push(shipment.clone());
        Ok(())
    }

    async fn get_return(&self, id: Uuid) -> CoreResult<Option<ReturnRequest>> {
        Ok(self.returns.read().await.get(&id).cloned())
    }

    async fn find_open_return_for_order(&self, order_id: Uuid) -> CoreResult<Option<ReturnRequest>> {
        let returns = self.returns.read().await;
        Ok(returns
            .values()
            .filter(|r| r.order_id == order_id && !r.is_finished())
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn update_return(&self, request: &ReturnRequest, expected: ReturnStatus) -> CoreResult<bool> {
        let mut returns = self.returns.write().await;
        match returns.get_mut(&request.id) {
            Some(stored) if stored.status == expected => {
                let mut updated = request.clone();
                updated.updated_at = Utc::now();
                *stored = updated;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_return_shipment(&self, return_request_id: Uuid) -> CoreResult<Option<ReturnShipment>> {
        let shipments = self.return_shipments.read().await;
        Ok(shipments
            .iter()
            .filter(|s| s.return_request_id == return_request_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn find_return_shipment_by_tracking(&self, tracking_id: &str) -> CoreResult<Option<ReturnShipment>> {
        let shipments = self.return_shipments.read().await;
        Ok(shipments
            .iter()
            .find(|s| s.tracking_id.as_deref() == Some(tracking_id))
            .cloned())
    }

    async fn mirror_return_status(&self, return_request_id: Uuid) -> CoreResult<Option<ReturnStatus>> {
        if self.fail_shipment_status_writes.load(Ordering::SeqCst) {
            return Err(CoreError::StorageError("return_shipments unavailable".to_string()));
        }

        // Same lock order as insert_return.
        let returns = self.returns.read().await;
        let mut shipments = self.return_shipments.write().await;
        let Some(status) = returns.get(&return_request_id).map(|r| r.status) else {
            return Ok(None);
        };
        let latest = shipments
            .iter_mut()
            .filter(|s| s.return_request_id == return_request_id)
            .max_by_key(|s| s.created_at);
        Ok(latest.map(|shipment| {
            shipment.status = status;
            shipment.updated_at = Utc::now();
            status
        }))
    }

    async fn set_return_shipment_tracking(
        &self,
        shipment_id: Uuid,
        tracking_id: &str,
        courier_order_id: Option<&str>,
    ) -> CoreResult<()> {
        let mut shipments = self.return_shipments.write().await;
        if let Some(shipment) = shipments.iter_mut().find(|s| s.id == shipment_id) {
            shipment.tracking_id = Some(tracking_id.to_string());
            if let Some(order_no) = courier_order_id {
                shipment.courier_order_id = Some(order_no.to_string());
            }
            shipment.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_unresolved_return_shipments(&self) -> CoreResult<Vec<ReturnShipment>> {
        let shipments = self.return_shipments.read().await;
        Ok(shipments
            .iter()
            .filter(|s| s.tracking_id.is_some() && s.status.awaits_courier())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn load_catalog(&self) -> CoreResult<Catalog> {
        Ok(self.catalog.read().await.clone())
    }
}

/// Lock set for a single process.
#[derive(Default)]
pub struct LocalLocks {
    held: Mutex<HashMap<String, String>>,
}

impl LocalLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShipmentLocks for LocalLocks {
    async fn try_acquire(&self, key: &str, owner: &str, _ttl_seconds: u64) -> CoreResult<bool> {
        let mut held = self.held.lock().await;
        if held.contains_key(key) {
            return Ok(false);
        }
        held.insert(key.to_string(), owner.to_string());
        Ok(true)
    }

    async fn release(&self, key: &str, owner: &str) -> CoreResult<()> {
        let mut held = self.held.lock().await;
        if held.get(key).map(String::as_str) == Some(owner) {
            held.remove(key);
        }
        Ok(())
    }
}

/// Keeps every published event, for assertions.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().await.clone()
    }

    pub async fn topics(&self) -> HashSet<&'static str> {
        self.events.lock().await.iter().map(DomainEvent::topic).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DomainEvent) -> CoreResult<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hublink_shared::Masked;
    use rust_decimal_macros::dec;

    fn order(external_id: &str) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            external_id: external_id.to_string(),
            customer_id: None,
            customer_name: "Ada Obi".to_string(),
            customer_email: Masked::new("ada@example.com".to_string()),
            customer_phone: None,
            shipping_address: "1 Marina".to_string(),
            shipping_city: "Ikeja".to_string(),
            shipping_state: "Lagos".to_string(),
            subtotal: dec!(100),
            total: dec!(110),
            shipping_fee_paid: dec!(10),
            payment_status: "paid".to_string(),
            overall_status: OrderStatus::Processing,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_order_is_keyed_on_external_id() {
        let store = MemoryStore::new();
        let first = store.insert_order(&order("wc-1")).await.unwrap();
        let second = store.insert_order(&order("wc-1")).await.unwrap();

        assert!(matches!(first, InsertOutcome::Inserted(_)));
        assert_eq!(second, InsertOutcome::Existing(first.id()));
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn test_local_locks_are_exclusive() {
        let locks = LocalLocks::new();
        assert!(locks.try_acquire("k", "a", 30).await.unwrap());
        assert!(!locks.try_acquire("k", "b", 30).await.unwrap());

        // Wrong owner cannot release.
        locks.release("k", "b").await.unwrap();
        assert!(!locks.try_acquire("k", "b", 30).await.unwrap());

        locks.release("k", "a").await.unwrap();
        assert!(locks.try_acquire("k", "b", 30).await.unwrap());
    }
}
