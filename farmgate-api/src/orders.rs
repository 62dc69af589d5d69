use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use farmgate_core::{Actor, PaymentOutcome, SettlementResponse};
use farmgate_order::{CheckoutRequest, Escrow, EscrowStatusView, Order, OrderReceipt, OrderStatus};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::ApiJson;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    pub reason: String,
}

/// Payment gateway callback body
#[derive(Debug, Deserialize)]
pub struct PaymentStatusRequest {
    pub status: PaymentOutcome,
}

#[derive(Debug, Deserialize)]
pub struct DisputeRequest {
    pub reason: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders", post(create_order))
        .route("/v1/orders/{id}", get(get_order))
        .route("/v1/orders/{id}/status", post(update_order_status))
        .route("/v1/orders/{id}/cancel", post(cancel_order))
        .route("/v1/orders/{id}/payment", post(update_payment_status))
        .route("/v1/orders/{id}/dispute", post(open_dispute))
        .route("/v1/orders/{id}/escrow", get(get_escrow_status))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/orders
/// Checkout: one order, one escrow per vendor
pub async fn create_order(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    ApiJson(req): ApiJson<CheckoutRequest>,
) -> Result<(StatusCode, Json<SettlementResponse<OrderReceipt>>), AppError> {
    let result = state.orchestrator.create_order(&actor, req).await;
    state.metrics.record("create_order", &result);
    Ok((StatusCode::CREATED, Json(SettlementResponse::ok(result?))))
}

/// GET /v1/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<SettlementResponse<Order>>, AppError> {
    let result = state.orchestrator.get_order(order_id, &actor).await;
    state.metrics.record("get_order", &result);
    Ok(Json(SettlementResponse::ok(result?)))
}

/// POST /v1/orders/{id}/status
pub async fn update_order_status(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
    ApiJson(req): ApiJson<UpdateStatusRequest>,
) -> Result<Json<SettlementResponse<Order>>, AppError> {
    let result = state.orchestrator.update_order_status(order_id, req.status, &actor).await;
    state.metrics.record("update_order_status", &result);
    Ok(Json(SettlementResponse::ok(result?)))
}

/// POST /v1/orders/{id}/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
    ApiJson(req): ApiJson<CancelOrderRequest>,
) -> Result<Json<SettlementResponse<Order>>, AppError> {
    let result = state.orchestrator.cancel_order(order_id, &actor, &req.reason).await;
    state.metrics.record("cancel_order", &result);
    Ok(Json(SettlementResponse::ok(result?)))
}

/// POST /v1/orders/{id}/payment
/// Called by the payment gateway; replays are no-ops
pub async fn update_payment_status(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
    ApiJson(req): ApiJson<PaymentStatusRequest>,
) -> Result<Json<SettlementResponse<Order>>, AppError> {
    let result = state.orchestrator.update_payment_status(order_id, req.status, &actor).await;
    state.metrics.record("update_payment_status", &result);
    Ok(Json(SettlementResponse::ok(result?)))
}

/// POST /v1/orders/{id}/dispute
pub async fn open_dispute(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
    ApiJson(req): ApiJson<DisputeRequest>,
) -> Result<Json<SettlementResponse<Vec<Escrow>>>, AppError> {
    let result = state.orchestrator.open_dispute(order_id, &actor, &req.reason).await;
    state.metrics.record("open_dispute", &result);
    Ok(Json(SettlementResponse::ok(result?)))
}

/// GET /v1/orders/{id}/escrow
pub async fn get_escrow_status(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<SettlementResponse<EscrowStatusView>>, AppError> {
    let result = state.orchestrator.get_escrow_status(order_id, &actor).await;
    state.metrics.record("get_escrow_status", &result);
    Ok(Json(SettlementResponse::ok(result?)))
}
