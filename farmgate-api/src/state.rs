use std::sync::Arc;
use farmgate_order::SettlementOrchestrator;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SettlementOrchestrator>,
    pub auth: AuthConfig,
    pub metrics: Arc<Metrics>,
}
