//! Return request and refund lifecycle.
//!
//! Every transition goes through [`ReturnService::commit`], which writes the
//! request conditionally on its previous status and then copies the stored
//! status onto the return shipment. A failed copy is logged and does not undo
//! the request change.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hublink_catalog::Hub;
use hublink_core::courier::{ReturnPickupRequest, ShipmentParty};
use hublink_core::events::{publish_quietly, EventPublisher};
use hublink_core::locks::{self, shipment_key, ShipmentLocks};
use hublink_core::refund::RefundConnector;
use hublink_core::repository::{CatalogRepository, OrderRepository, ReturnRepository};
use hublink_core::status_map::return_status_for;
use hublink_core::{CoreError, CoreResult, CourierAdapter};
use hublink_shared::models::events::{DomainEvent, RefundEvent, ReturnStatusChangedEvent};
use hublink_shared::money::round_money;
use hublink_shared::{
    Order, ResolutionPreference, ReturnMethod, ReturnRequest, ReturnShipment, ReturnStatus,
};

use crate::shipment::LOCK_WAIT;

#[derive(Debug, Clone)]
pub struct ReturnSettings {
    pub window_days: i64,
    pub lock_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateReturn {
    pub order_id: Uuid,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub method: ReturnMethod,
    pub resolution: ResolutionPreference,
    pub reason: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    /// Hub receiving the goods; defaults to the hub of the order's first sub-order.
    pub hub_id: Option<Uuid>,
    /// Customer address for a pickup.
    pub pickup_address: Option<String>,
    pub pickup_city: Option<String>,
    pub pickup_state: Option<String>,
}

/// Staff inspection decision.
#[derive(Debug, Clone, Deserialize)]
pub struct InspectionDecision {
    pub status: String,
    pub inspection_result: Option<String>,
    pub inspection_notes: Option<String>,
    #[serde(default, deserialize_with = "hublink_shared::money::lenient_decimal_opt")]
    pub approved_refund_amount: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReturnUpdateOutcome {
    Applied { from: ReturnStatus, to: ReturnStatus },
    Unchanged,
    Ignored { reason: String },
    UnknownTracking,
}

pub struct ReturnService {
    orders: Arc<dyn OrderRepository>,
    returns: Arc<dyn ReturnRepository>,
    catalog: Arc<dyn CatalogRepository>,
    courier: Arc<dyn CourierAdapter>,
    refunds: Arc<dyn RefundConnector>,
    locks: Arc<dyn ShipmentLocks>,
    events: Arc<dyn EventPublisher>,
    settings: ReturnSettings,
}

impl ReturnService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        returns: Arc<dyn ReturnRepository>,
        catalog: Arc<dyn CatalogRepository>,
        courier: Arc<dyn CourierAdapter>,
        refunds: Arc<dyn RefundConnector>,
        locks: Arc<dyn ShipmentLocks>,
        events: Arc<dyn EventPublisher>,
        settings: ReturnSettings,
    ) -> Self {
        Self {
            orders,
            returns,
            catalog,
            courier,
            refunds,
            locks,
            events,
            settings,
        }
    }

    pub async fn get(&self, id: Uuid) -> CoreResult<ReturnRequest> {
        self.returns
            .get_return(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("return request {}", id)))
    }

    pub async fn shipment(&self, return_id: Uuid) -> CoreResult<ReturnShipment> {
        self.returns
            .get_return_shipment(return_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("return shipment for {}", return_id)))
    }

    pub async fn create(&self, input: CreateReturn) -> CoreResult<ReturnRequest> {
        let order = self
            .orders
            .get_order(input.order_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("order {}", input.order_id)))?;

        if !order.belongs_to(input.customer_id.as_deref(), input.customer_email.as_deref()) {
            warn!(order_id = %order.id, "Return requested by someone other than the customer");
            return Err(CoreError::Forbidden("order does not belong to this customer".to_string()));
        }

        let age_days = (Utc::now() - order.created_at).num_days();
        if age_days > self.settings.window_days {
            info!(order_id = %order.id, age_days, "Return window exceeded");
            return Err(CoreError::WindowExceeded {
                window_days: self.settings.window_days,
                age_days,
            });
        }

        if input.reason.trim().is_empty() {
            return Err(CoreError::ValidationError("reason is required".to_string()));
        }
        if let Some(open) = self.returns.find_open_return_for_order(order.id).await? {
            return Err(CoreError::ValidationError(format!(
                "order already has an open return request {} ({})",
                open.id, open.status
            )));
        }

        let hub = self.resolve_hub(&order, input.hub_id).await?;
        let pickup_address = match input.method {
            ReturnMethod::Pickup => Some(pickup_address(&input)?),
            ReturnMethod::Dropoff => None,
        };

        let status = match input.method {
            ReturnMethod::Pickup => ReturnStatus::Requested,
            ReturnMethod::Dropoff => ReturnStatus::AwaitingDropoff,
        };
        let now = Utc::now();
        let request = ReturnRequest {
            id: Uuid::new_v4(),
            order_id: order.id,
            customer_id: order.customer_id.clone(),
            customer_email: order.customer_email.clone(),
            method: input.method,
            resolution: input.resolution,
            reason: input.reason.trim().to_string(),
            evidence: input.evidence,
            status,
            hub_id: Some(hub.id),
            inspection_result: None,
            inspection_notes: None,
            approved_refund_amount: None,
            refund_amount: None,
            refund_currency: None,
            refund_reference: None,
            refund_raw: None,
            refund_completed_at: None,
            created_at: now,
            updated_at: now,
        };
        let shipment = ReturnShipment {
            id: Uuid::new_v4(),
            return_request_id: request.id,
            method: input.method,
            courier_id: hub.default_courier_id,
            courier_order_id: None,
            tracking_id: None,
            status,
            pickup_address: pickup_address.as_ref().map(|p| format!("{}, {}, {}", p.address, p.city, p.state)),
            hub_address: Some(format!("{}, {}, {}", hub.address, hub.city, hub.state)),
            created_at: now,
            updated_at: now,
        };

        self.returns.insert_return(&request, &shipment).await?;
        info!(return_id = %request.id, order_id = %order.id, method = ?request.method, "Return request created");
        self.publish_status(&request, None).await;

        match pickup_address {
            Some(customer) => self.book_pickup(request, &shipment, &order, customer, &hub).await,
            None => Ok(request),
        }
    }

    /// Books the courier pickup for a `requested` pickup return.
    pub async fn retry_pickup_booking(&self, return_id: Uuid) -> CoreResult<ReturnRequest> {
        let request = self.get(return_id).await?;
        if request.method != ReturnMethod::Pickup || request.status != ReturnStatus::Requested {
            return Err(CoreError::ValidationError(format!(
                "return {} is a {:?} return in {}, pickup booking needs a requested pickup",
                return_id, request.method, request.status
            )));
        }

        let shipment = self.shipment(return_id).await?;
        let order = self.order_for(&request).await?;
        let hub = self.resolve_hub(&order, request.hub_id).await?;
        let customer = ShipmentParty {
            name: order.customer_name.clone(),
            phone: order.customer_phone.as_ref().map(|p| p.expose().clone()),
            email: Some(order.customer_email.expose().clone()),
            address: shipment.pickup_address.clone().unwrap_or_else(|| order.shipping_address.clone()),
            city: order.shipping_city.clone(),
            state: order.shipping_state.clone(),
        };

        self.book_pickup(request, &shipment, &order, customer, &hub).await
    }

    async fn book_pickup(
        &self,
        mut request: ReturnRequest,
        shipment: &ReturnShipment,
        order: &Order,
        customer: ShipmentParty,
        hub: &Hub,
    ) -> CoreResult<ReturnRequest> {
        let pickup = ReturnPickupRequest {
            reference: request.id.to_string(),
            customer,
            hub: ShipmentParty {
                name: hub.name.clone(),
                phone: hub.phone.clone(),
                email: None,
                address: hub.address.clone(),
                city: hub.city.clone(),
                state: hub.state.clone(),
            },
            description: format!("Return for order {}: {}", order.external_id, request.reason),
            weight: Decimal::ONE,
            value: order.items_total(),
        };

        let booked = match self.courier.book_return_pickup(&pickup).await {
            Ok(booked) => booked,
            Err(e) => {
                warn!(return_id = %request.id, "Pickup booking failed, return stays requested: {}", e);
                return Err(CoreError::CourierUnavailable(format!(
                    "return {} saved as requested, pickup booking failed: {}",
                    request.id, e
                )));
            }
        };

        self.returns
            .set_return_shipment_tracking(shipment.id, &booked.tracking_id, Some(&booked.external_order_id))
            .await?;
        info!(return_id = %request.id, tracking = %booked.tracking_id, "Return pickup booked");

        self.commit(&mut request, ReturnStatus::PickupScheduled).await?;
        Ok(request)
    }

    /// Customer-supplied courier tracking for a drop-off. Status is unchanged.
    pub async fn submit_tracking(&self, return_id: Uuid, tracking_id: &str) -> CoreResult<ReturnShipment> {
        let tracking_id = tracking_id.trim();
        if tracking_id.is_empty() {
            return Err(CoreError::ValidationError("tracking_id is required".to_string()));
        }

        let request = self.get(return_id).await?;
        if request.method != ReturnMethod::Dropoff || request.status != ReturnStatus::AwaitingDropoff {
            return Err(CoreError::ValidationError(format!(
                "tracking can only be submitted for a drop-off awaiting drop-off, return is {}",
                request.status
            )));
        }

        let shipment = self.shipment(return_id).await?;
        self.returns
            .set_return_shipment_tracking(shipment.id, tracking_id, None)
            .await?;
        info!(%return_id, tracking = tracking_id, "Customer submitted return tracking");

        self.shipment(return_id).await
    }

    /// Goods arrived at the hub.
    pub async fn mark_received(&self, return_id: Uuid) -> CoreResult<ReturnRequest> {
        let mut request = self.get(return_id).await?;
        self.commit(&mut request, ReturnStatus::DeliveredToHub).await?;
        Ok(request)
    }

    pub async fn start_inspection(&self, return_id: Uuid) -> CoreResult<ReturnRequest> {
        let mut request = self.get(return_id).await?;
        self.commit(&mut request, ReturnStatus::InspectionInProgress).await?;
        Ok(request)
    }

    /// Approve or reject after inspection. Approval of a refund return runs
    /// the refund straight away.
    pub async fn decide(&self, return_id: Uuid, decision: InspectionDecision) -> CoreResult<ReturnRequest> {
        let target = match decision.status.trim() {
            "approved" => ReturnStatus::Approved,
            "rejected" => ReturnStatus::Rejected,
            other => {
                return Err(CoreError::ValidationError(format!(
                    "decision status must be approved or rejected, got {:?}",
                    other
                )))
            }
        };

        let mut request = self.get(return_id).await?;
        if !matches!(
            request.status,
            ReturnStatus::DeliveredToHub | ReturnStatus::InspectionInProgress
        ) {
            return Err(CoreError::ValidationError(format!(
                "return {} is {}, decisions need delivered_to_hub or inspection_in_progress",
                return_id, request.status
            )));
        }

        let refund_due = target == ReturnStatus::Approved && request.resolution == ResolutionPreference::Refund;
        if refund_due {
            let amount = decision.approved_refund_amount.ok_or_else(|| {
                CoreError::ValidationError("approved_refund_amount is required to approve a refund".to_string())
            })?;
            let order = self.order_for(&request).await?;
            if amount <= Decimal::ZERO || amount > order.total {
                return Err(CoreError::ValidationError(format!(
                    "approved_refund_amount must be greater than 0 and at most the order total {}",
                    order.total
                )));
            }
            request.approved_refund_amount = Some(round_money(amount));
        }

        request.inspection_result = decision.inspection_result;
        request.inspection_notes = decision.inspection_notes;
        self.commit(&mut request, target).await?;

        if refund_due {
            return self.execute_refund(request).await;
        }
        Ok(request)
    }

    /// Re-run a refund that failed, or one that never started after approval.
    pub async fn retry_refund(&self, return_id: Uuid) -> CoreResult<ReturnRequest> {
        let request = self.get(return_id).await?;
        let stalled_approval = request.status == ReturnStatus::Approved
            && request.resolution == ResolutionPreference::Refund
            && request.approved_refund_amount.is_some();
        if request.status != ReturnStatus::RefundFailed && !stalled_approval {
            return Err(CoreError::ValidationError(format!(
                "only refund_failed or approved refund returns can be retried, return is {}",
                request.status
            )));
        }
        if stalled_approval {
            warn!(%return_id, "Starting refund for a return left in approved");
        }
        self.execute_refund(request).await
    }

    async fn execute_refund(&self, mut request: ReturnRequest) -> CoreResult<ReturnRequest> {
        let amount = request
            .approved_refund_amount
            .ok_or_else(|| CoreError::InternalError(format!("return {} has no approved amount", request.id)))?;
        let order = self.order_for(&request).await?;

        self.commit(&mut request, ReturnStatus::RefundProcessing).await?;

        let reason = format!("Return {}: {}", request.id, request.reason);
        match self.refunds.refund(&order.external_id, amount, &reason).await {
            Ok(receipt) => {
                request.refund_amount = Some(receipt.amount);
                request.refund_currency = Some(receipt.currency.clone());
                request.refund_reference = Some(receipt.id.clone());
                request.refund_raw = Some(receipt.raw.clone());
                request.refund_completed_at = Some(Utc::now());
                self.commit(&mut request, ReturnStatus::RefundCompleted).await?;

                info!(return_id = %request.id, refund_id = %receipt.id, %amount, "Refund completed");
                publish_quietly(
                    self.events.as_ref(),
                    DomainEvent::RefundCompleted(refund_event(&request, amount, Some(receipt.id), None)),
                )
                .await;
                Ok(request)
            }
            Err(e) => {
                request.refund_raw = Some(json!({
                    "error": e.message,
                    "response": e.raw,
                }));
                request.refund_completed_at = None;
                self.commit(&mut request, ReturnStatus::RefundFailed).await?;

                error!(return_id = %request.id, %amount, "Refund failed: {}", e.message);
                publish_quietly(
                    self.events.as_ref(),
                    DomainEvent::RefundFailed(refund_event(&request, amount, None, Some(e.message.clone()))),
                )
                .await;
                Err(CoreError::RefundFailed(e.message))
            }
        }
    }

    /// Courier status for a return shipment, serialized per tracking id.
    pub async fn apply_courier_update(&self, tracking_id: &str, provider_status: &str) -> CoreResult<ReturnUpdateOutcome> {
        let key = shipment_key(tracking_id);
        let owner = locks::acquire(self.locks.as_ref(), &key, self.settings.lock_ttl_seconds, LOCK_WAIT)
            .await?
            .ok_or_else(|| CoreError::InternalError(format!("return shipment {} is locked", tracking_id)))?;

        let result = self.apply_locked(tracking_id, provider_status).await;

        if let Err(e) = self.locks.release(&key, &owner).await {
            warn!(tracking = tracking_id, "Failed to release shipment lock: {}", e);
        }
        result
    }

    async fn apply_locked(&self, tracking_id: &str, provider_status: &str) -> CoreResult<ReturnUpdateOutcome> {
        let Some(shipment) = self.returns.find_return_shipment_by_tracking(tracking_id).await? else {
            return Ok(ReturnUpdateOutcome::UnknownTracking);
        };
        let Some(target) = return_status_for(self.courier.map_status(provider_status)) else {
            return Ok(ReturnUpdateOutcome::Unchanged);
        };

        let mut request = self.get(shipment.return_request_id).await?;
        let from = request.status;
        if from == target {
            if shipment.status != target {
                self.mirror(&request).await;
            }
            return Ok(ReturnUpdateOutcome::Unchanged);
        }
        if !from.awaits_courier() || !from.can_transition_to(target) {
            info!(tracking = tracking_id, %from, %target, "Return courier update ignored");
            return Ok(ReturnUpdateOutcome::Ignored {
                reason: format!("{} -> {} not allowed", from, target),
            });
        }

        match self.commit(&mut request, target).await {
            Ok(()) => Ok(ReturnUpdateOutcome::Applied { from, to: target }),
            Err(CoreError::ValidationError(reason)) => Ok(ReturnUpdateOutcome::Ignored { reason }),
            Err(e) => Err(e),
        }
    }

    /// Conditional write of `request` moving to `to`, then the shipment mirror.
    async fn commit(&self, request: &mut ReturnRequest, to: ReturnStatus) -> CoreResult<()> {
        let from = request.status;
        if !from.can_transition_to(to) {
            return Err(CoreError::ValidationError(format!(
                "return {} cannot move from {} to {}",
                request.id, from, to
            )));
        }

        request.status = to;
        if !self.returns.update_return(request, from).await? {
            request.status = from;
            return Err(CoreError::ValidationError(format!(
                "return {} changed concurrently, expected {}",
                request.id, from
            )));
        }
        request.updated_at = Utc::now();

        info!(return_id = %request.id, %from, %to, "Return status updated");
        self.mirror(request).await;
        self.publish_status(request, Some(from)).await;
        Ok(())
    }

    async fn mirror(&self, request: &ReturnRequest) {
        match self.returns.mirror_return_status(request.id).await {
            Ok(Some(status)) if status != request.status => {
                debug!(return_id = %request.id, %status, "Return moved on before its shipment was updated");
            }
            Ok(Some(_)) => {}
            Ok(None) => error!(return_id = %request.id, "Return has no shipment to mirror status onto"),
            Err(e) => error!(
                return_id = %request.id,
                status = %request.status,
                "Return shipment status out of sync: {}",
                e
            ),
        }
    }

    async fn publish_status(&self, request: &ReturnRequest, from: Option<ReturnStatus>) {
        publish_quietly(
            self.events.as_ref(),
            DomainEvent::ReturnStatusChanged(ReturnStatusChangedEvent {
                return_request_id: request.id,
                order_id: request.order_id,
                from: from.map(|s| s.as_str().to_string()).unwrap_or_default(),
                to: request.status.as_str().to_string(),
                timestamp: Utc::now().timestamp(),
            }),
        )
        .await;
    }

    async fn order_for(&self, request: &ReturnRequest) -> CoreResult<Order> {
        self.orders
            .get_order(request.order_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("order {}", request.order_id)))
    }

    async fn resolve_hub(&self, order: &Order, requested: Option<Uuid>) -> CoreResult<Hub> {
        let hub_id = match requested {
            Some(id) => id,
            None => self
                .orders
                .list_sub_orders(order.id)
                .await?
                .first()
                .map(|s| s.hub_id)
                .ok_or_else(|| CoreError::ValidationError("hub_id is required for this order".to_string()))?,
        };

        let catalog = self.catalog.load_catalog().await?;
        catalog
            .hub(hub_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("hub {}", hub_id)))
    }
}

fn pickup_address(input: &CreateReturn) -> CoreResult<ShipmentParty> {
    let field = |value: &Option<String>| value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);

    let mut missing = Vec::new();
    let address = field(&input.pickup_address);
    let city = field(&input.pickup_city);
    let state = field(&input.pickup_state);
    if address.is_none() {
        missing.push("pickup_address");
    }
    if city.is_none() {
        missing.push("pickup_city");
    }
    if state.is_none() {
        missing.push("pickup_state");
    }
    if !missing.is_empty() {
        return Err(CoreError::ValidationError(format!(
            "pickup returns need: {}",
            missing.join(", ")
        )));
    }

    Ok(ShipmentParty {
        name: String::new(),
        phone: None,
        email: input.customer_email.clone(),
        address: address.unwrap_or_default(),
        city: city.unwrap_or_default(),
        state: state.unwrap_or_default(),
    })
}

fn refund_event(request: &ReturnRequest, amount: Decimal, reference: Option<String>, error: Option<String>) -> RefundEvent {
    RefundEvent {
        return_request_id: request.id,
        order_id: request.order_id,
        amount,
        reference,
        error,
        timestamp: Utc::now().timestamp(),
    }
}
