use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use hublink_core::CoreError;
use hublink_order::{DispatchOutcome, SyncReport};
use hublink_shared::{Order, SubOrder, TrackingEvent};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
    pub sub_orders: Vec<SubOrder>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/orders/{id}", get(get_order))
        .route("/api/sub-orders/{id}/dispatch", post(dispatch_sub_order))
        .route("/api/sub-orders/{id}/tracking", get(tracking_log))
        .route("/api/sync/run", post(run_sync))
}

/// GET /api/orders/{id}
async fn get_order(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<OrderResponse>, AppError> {
    let order = state
        .orders
        .get_order(id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("order {}", id)))?;
    let sub_orders = state.orders.list_sub_orders(id).await?;

    Ok(Json(OrderResponse { order, sub_orders }))
}

/// POST /api/sub-orders/{id}/dispatch
async fn dispatch_sub_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchOutcome>, AppError> {
    Ok(Json(state.shipments.dispatch(id).await?))
}

/// GET /api/sub-orders/{id}/tracking
async fn tracking_log(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TrackingEvent>>, AppError> {
    if state.orders.get_sub_order(id).await?.is_none() {
        return Err(CoreError::NotFound(format!("sub-order {}", id)).into());
    }
    Ok(Json(state.orders.list_tracking_events(id).await?))
}

/// POST /api/sync/run
async fn run_sync(State(state): State<AppState>) -> Result<Json<SyncReport>, AppError> {
    Ok(Json(state.sync.run_once().await?))
}
