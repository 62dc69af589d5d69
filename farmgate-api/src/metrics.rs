use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::state::AppState;

/// Settlement counters, registered on a registry owned by the app state.
pub struct Metrics {
    registry: Registry,
    operations: IntCounterVec,
    auto_release: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new("farmgate_settlement_operations_total", "Settlement operations by outcome"),
            &["operation", "outcome"],
        )?;
        let auto_release = IntCounterVec::new(
            Opts::new("farmgate_auto_release_total", "Escrows handled by the auto-release sweep"),
            &["outcome"],
        )?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(auto_release.clone()))?;

        Ok(Self { registry, operations, auto_release })
    }

    pub fn record<T, E>(&self, operation: &str, result: &Result<T, E>) {
        let outcome = if result.is_ok() { "ok" } else { "error" };
        self.operations.with_label_values(&[operation, outcome]).inc();
    }

    pub fn record_auto_release(&self, released: u64, failed: u64) {
        self.auto_release.with_label_values(&["released"]).inc_by(released);
        self.auto_release.with_label_values(&["failed"]).inc_by(failed);
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// GET /metrics
pub async fn render(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode Prometheus metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_text_output() {
        let metrics = Metrics::new().unwrap();
        metrics.record::<(), ()>("confirm_delivery", &Ok(()));
        metrics.record::<(), ()>("confirm_delivery", &Err(()));
        metrics.record_auto_release(3, 1);

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"farmgate_settlement_operations_total{operation="confirm_delivery",outcome="ok"} 1"#));
        assert!(text.contains(r#"farmgate_auto_release_total{outcome="released"} 3"#));
    }
}
