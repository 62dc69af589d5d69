use axum::{
    extract::{Path, State},
    routing::post,
    Extension, Json, Router,
};
use farmgate_core::{Actor, SettlementResponse};
use farmgate_order::{Escrow, ManualResolution, SweepOutcome};
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::ApiJson;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/escrows/{id}/confirm", post(confirm_delivery))
        .route("/v1/admin/orders/{id}/release", post(manual_release))
        .route("/v1/admin/orders/{id}/refund", post(manual_refund))
        .route("/v1/admin/escrows/sweep", post(sweep_auto_release))
}

/// POST /v1/escrows/{id}/confirm
/// Buyer confirms the goods arrived; funds go to the vendor
pub async fn confirm_delivery(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(escrow_id): Path<Uuid>,
) -> Result<Json<SettlementResponse<Escrow>>, AppError> {
    let result = state.orchestrator.confirm_delivery(escrow_id, &actor).await;
    state.metrics.record("confirm_delivery", &result);
    Ok(Json(SettlementResponse::ok(result?)))
}

/// POST /v1/admin/orders/{id}/release
pub async fn manual_release(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
    ApiJson(req): ApiJson<ManualResolution>,
) -> Result<Json<SettlementResponse<Vec<Escrow>>>, AppError> {
    let result = state.orchestrator.manual_release(order_id, &actor, req).await;
    state.metrics.record("manual_release", &result);
    Ok(Json(SettlementResponse::ok(result?)))
}

/// POST /v1/admin/orders/{id}/refund
pub async fn manual_refund(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
    ApiJson(req): ApiJson<ManualResolution>,
) -> Result<Json<SettlementResponse<Vec<Escrow>>>, AppError> {
    let result = state.orchestrator.manual_refund(order_id, &actor, req).await;
    state.metrics.record("manual_refund", &result);
    Ok(Json(SettlementResponse::ok(result?)))
}

/// POST /v1/admin/escrows/sweep
/// Run the auto-release sweep now instead of waiting for the worker
pub async fn sweep_auto_release(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<SettlementResponse<Vec<SweepOutcome>>>, AppError> {
    let outcomes = state.orchestrator.sweep_auto_release(&actor).await?;
    let released = outcomes.iter().filter(|o| o.success).count() as u64;
    state.metrics.record_auto_release(released, outcomes.len() as u64 - released);
    Ok(Json(SettlementResponse::ok(outcomes)))
}
