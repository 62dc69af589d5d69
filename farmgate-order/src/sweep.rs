use crate::orchestrator::SettlementOrchestrator;
use farmgate_core::{Actor, SettlementError, SettlementResult};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// What happened to one escrow during an auto-release sweep
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SweepOutcome {
    pub escrow_id: Uuid,
    pub order_id: Uuid,
    pub success: bool,
    pub message: String,
}

impl SettlementOrchestrator {
    /// Release every escrow whose buyer let the confirmation deadline pass.
    ///
    /// Each escrow is settled in its own unit of work; a failure is recorded
    /// in the outcome list and the sweep moves on.
    pub async fn sweep_auto_release(&self, actor: &Actor) -> SettlementResult<Vec<SweepOutcome>> {
        if !actor.is_machine_or_admin() {
            return Err(SettlementError::Unauthorized(
                "the auto-release sweep is run by the scheduler or an admin".to_string(),
            ));
        }

        let mut tx = self.begin().await?;
        let now = tx.now();
        let candidates = tx.store().escrows_due_for_release(now).await.map_err(SettlementError::from);
        let candidates = self.finish(tx, candidates).await?;

        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        info!("Auto-release sweep found {} escrow(s) past deadline", candidates.len());

        let mut outcomes = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let outcome = match self.release_one(candidate.id).await {
                Ok(_) => SweepOutcome {
                    escrow_id: candidate.id,
                    order_id: candidate.order_id,
                    success: true,
                    message: "released to vendor".to_string(),
                },
                Err(e) => {
                    warn!("Auto-release of escrow {} failed: {}", candidate.id, e);
                    SweepOutcome {
                        escrow_id: candidate.id,
                        order_id: candidate.order_id,
                        success: false,
                        message: e.to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let released = outcomes.iter().filter(|o| o.success).count();
        info!("Auto-release sweep done: {} released, {} failed", released, outcomes.len() - released);
        Ok(outcomes)
    }

    async fn release_one(&self, escrow_id: Uuid) -> SettlementResult<()> {
        let mut tx = self.begin().await?;
        let result = self.orders.escrows().release_if_due(&mut tx, escrow_id).await.map(|_| ());
        self.finish(tx, result).await
    }
}
