use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hublink_order::{CreateReturn, InspectionDecision};
use hublink_shared::{ReturnRequest, ReturnShipment};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ReturnResponse {
    #[serde(flatten)]
    pub request: ReturnRequest,
    pub shipment: Option<ReturnShipment>,
}

#[derive(Debug, Deserialize)]
pub struct TrackingSubmission {
    pub tracking_id: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/returns", post(create_return))
        .route("/api/returns/{id}", get(get_return))
        .route("/api/returns/{id}/tracking", patch(submit_tracking))
        .route("/api/returns/{id}/received", post(mark_received))
        .route("/api/returns/{id}/inspection", post(start_inspection))
        .route("/api/returns/{id}/decision", post(decide))
        .route("/api/returns/{id}/retry-refund", post(retry_refund))
        .route("/api/returns/{id}/retry-pickup", post(retry_pickup))
}

async fn respond(state: &AppState, request: ReturnRequest) -> Result<Json<ReturnResponse>, AppError> {
    let shipment = state.returns.shipment(request.id).await.ok();
    Ok(Json(ReturnResponse { request, shipment }))
}

/// POST /api/returns
async fn create_return(
    State(state): State<AppState>,
    Json(input): Json<CreateReturn>,
) -> Result<(StatusCode, Json<ReturnResponse>), AppError> {
    let request = state.returns.create(input).await?;
    Ok((StatusCode::CREATED, respond(&state, request).await?))
}

/// GET /api/returns/{id}
async fn get_return(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ReturnResponse>, AppError> {
    let request = state.returns.get(id).await?;
    respond(&state, request).await
}

/// PATCH /api/returns/{id}/tracking
async fn submit_tracking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<TrackingSubmission>,
) -> Result<Json<ReturnShipment>, AppError> {
    Ok(Json(state.returns.submit_tracking(id, &body.tracking_id).await?))
}

/// POST /api/returns/{id}/received
async fn mark_received(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ReturnResponse>, AppError> {
    let request = state.returns.mark_received(id).await?;
    respond(&state, request).await
}

/// POST /api/returns/{id}/inspection
async fn start_inspection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReturnResponse>, AppError> {
    let request = state.returns.start_inspection(id).await?;
    respond(&state, request).await
}

/// POST /api/returns/{id}/decision
async fn decide(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(decision): Json<InspectionDecision>,
) -> Result<Json<ReturnResponse>, AppError> {
    let request = state.returns.decide(id, decision).await?;
    respond(&state, request).await
}

/// POST /api/returns/{id}/retry-refund
async fn retry_refund(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ReturnResponse>, AppError> {
    let request = state.returns.retry_refund(id).await?;
    respond(&state, request).await
}

/// POST /api/returns/{id}/retry-pickup
async fn retry_pickup(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ReturnResponse>, AppError> {
    let request = state.returns.retry_pickup_booking(id).await?;
    respond(&state, request).await
}
