use std::sync::Arc;
use std::time::Duration;
use farmgate_core::Actor;
use farmgate_order::SettlementOrchestrator;
use tracing::{error, info};

use crate::metrics::Metrics;

/// Drive the auto-release sweep on a fixed interval. Deadlines live in the
/// store, so a missed tick only delays a release until the next one.
pub async fn start_auto_release_worker(
    orchestrator: Arc<SettlementOrchestrator>,
    metrics: Arc<Metrics>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    let scheduler = Actor::system();

    info!("Auto-release worker started, sweeping every {:?}", every);

    loop {
        ticker.tick().await;

        match orchestrator.sweep_auto_release(&scheduler).await {
            Ok(outcomes) if outcomes.is_empty() => {}
            Ok(outcomes) => {
                let released = outcomes.iter().filter(|o| o.success).count() as u64;
                let failed = outcomes.len() as u64 - released;
                metrics.record_auto_release(released, failed);
                info!("Auto-release tick: {} released, {} failed", released, failed);
            }
            Err(e) => error!("Auto-release sweep failed: {}", e),
        }
    }
}
