use axum::{
    http::Method,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod escrows;
pub mod extract;
pub mod metrics;
pub mod middleware;
pub mod orders;
pub mod state;
pub mod worker;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    // Everything under /v1 needs a verified actor
    let settlement = Router::new()
        .merge(orders::routes())
        .merge(escrows::routes())
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::actor_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics::render))
        .merge(settlement)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
