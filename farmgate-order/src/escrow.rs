use crate::models::{Escrow, EscrowStatus, Order, ReleaseReason};
use crate::policy::SettlementPolicy;
use crate::repository::Tx;
use chrono::Duration;
use farmgate_core::{Actor, SettlementError, SettlementResult};
use farmgate_shared::SettlementEvent;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Admin (or dispute desk) instruction to settle held funds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualResolution {
    pub reason: String,
    /// Settle only this vendor's share of a multi-vendor order
    #[serde(default)]
    pub vendor_id: Option<Uuid>,
}

impl ManualResolution {
    pub fn new(reason: &str) -> Self {
        Self { reason: reason.to_string(), vendor_id: None }
    }

    pub fn for_vendor(reason: &str, vendor_id: Uuid) -> Self {
        Self { reason: reason.to_string(), vendor_id: Some(vendor_id) }
    }
}

/// Enforces the escrow state machine: funding, the delivery countdown,
/// buyer confirmation, admin settlement and the auto-release step.
#[derive(Debug, Clone)]
pub struct EscrowLifecycleManager {
    confirmation_window: Duration,
}

impl EscrowLifecycleManager {
    pub fn new(policy: &SettlementPolicy) -> Self {
        Self { confirmation_window: policy.confirmation_window }
    }

    pub fn confirmation_window(&self) -> Duration {
        self.confirmation_window
    }

    /// One escrow per distinct vendor; amounts add up to the order total.
    pub async fn open_escrows(&self, tx: &mut Tx, order: &Order) -> SettlementResult<Vec<Escrow>> {
        let now = tx.now();
        let mut escrows = Vec::new();

        for (vendor_id, amount) in order.vendor_totals()? {
            let escrow = Escrow::new(order.id, vendor_id, order.buyer_id, amount, &order.currency, now);
            tx.store().insert_escrow(&escrow).await?;
            escrows.push(escrow);
        }

        Ok(escrows)
    }

    /// `pending → funded`. Already funded is a no-op; terminal is an error.
    pub async fn fund(&self, tx: &mut Tx, escrow_id: Uuid) -> SettlementResult<Escrow> {
        let mut escrow = self.load(tx, escrow_id).await?;
        self.fund_loaded(tx, &mut escrow).await?;
        Ok(escrow)
    }

    /// Fund every escrow of a freshly paid order
    pub async fn fund_order(&self, tx: &mut Tx, order: &Order) -> SettlementResult<Vec<Escrow>> {
        let mut escrows = tx.store().escrows_for_order(order.id).await?;
        for escrow in escrows.iter_mut() {
            self.fund_loaded(tx, escrow).await?;
        }
        Ok(escrows)
    }

    async fn fund_loaded(&self, tx: &mut Tx, escrow: &mut Escrow) -> SettlementResult<()> {
        if escrow.status != EscrowStatus::Pending {
            if escrow.funded_at.is_some() && !escrow.status.is_terminal() {
                return Ok(());
            }
            return Err(SettlementError::InvalidTransition {
                from: escrow.status.to_string(),
                to: EscrowStatus::Funded.to_string(),
            });
        }

        let now = tx.now();
        escrow.transition(EscrowStatus::Funded, now)?;
        tx.store().update_escrow(escrow).await?;
        tx.emit(SettlementEvent::EscrowFunded {
            escrow_id: escrow.id,
            order_id: escrow.order_id,
            vendor_id: escrow.vendor_id,
            amount: escrow.amount,
            timestamp: now.timestamp(),
        });
        info!("Escrow {} funded ({} {})", escrow.id, escrow.amount, escrow.currency);
        Ok(())
    }

    /// Start the buyer confirmation countdown on every funded escrow of the order.
    ///
    /// Cash-on-delivery escrows are still `pending` at this point; the cash
    /// changes hands at the door, so they are funded first.
    pub async fn mark_delivered(&self, tx: &mut Tx, order: &Order) -> SettlementResult<Vec<Escrow>> {
        let now = tx.now();
        let deadline = now + self.confirmation_window;
        let mut escrows = tx.store().escrows_for_order(order.id).await?;

        for escrow in escrows.iter_mut() {
            if escrow.status == EscrowStatus::Pending && !order.payment_method.is_prepaid() {
                self.fund_loaded(tx, escrow).await?;
            }
            if escrow.status != EscrowStatus::Funded {
                continue;
            }

            escrow.transition(EscrowStatus::PendingConfirmation, now)?;
            escrow.delivered_at = Some(now);
            escrow.confirmation_deadline = Some(deadline);
            tx.store().update_escrow(escrow).await?;
            tx.emit(SettlementEvent::EscrowAwaitingConfirmation {
                escrow_id: escrow.id,
                order_id: escrow.order_id,
                buyer_id: escrow.buyer_id,
                confirmation_deadline: deadline.timestamp(),
                timestamp: now.timestamp(),
            });
            info!("Escrow {} awaiting buyer confirmation until {}", escrow.id, deadline);
        }

        Ok(escrows)
    }

    /// Buyer says the goods arrived: release to the vendor immediately.
    pub async fn confirm_delivery(&self, tx: &mut Tx, escrow_id: Uuid, buyer: &Actor) -> SettlementResult<Escrow> {
        let mut escrow = self.load(tx, escrow_id).await?;

        if escrow.buyer_id != buyer.id {
            return Err(SettlementError::Unauthorized(format!(
                "only the buyer may confirm delivery for escrow {}",
                escrow_id
            )));
        }
        if escrow.status != EscrowStatus::PendingConfirmation {
            return Err(SettlementError::NotConfirmable {
                escrow_id,
                status: escrow.status.to_string(),
            });
        }

        escrow.buyer_confirmed_at = Some(tx.now());
        self.release(tx, &mut escrow, ReleaseReason::BuyerConfirmed).await?;
        Ok(escrow)
    }

    /// Admin override: pay the vendor(s) now.
    pub async fn manual_release(
        &self,
        tx: &mut Tx,
        order_id: Uuid,
        admin: &Actor,
        resolution: &ManualResolution,
    ) -> SettlementResult<Vec<Escrow>> {
        let mut escrows = self.resolvable(tx, order_id, admin, resolution).await?;

        if !escrows.iter().any(|e| e.status.is_admin_resolvable()) {
            let first = &escrows[0];
            return Err(SettlementError::EscrowNotReleasable {
                escrow_id: first.id.to_string(),
                status: first.status.to_string(),
            });
        }

        for escrow in escrows.iter_mut().filter(|e| e.status.is_admin_resolvable()) {
            escrow.admin_notes = Some(resolution.reason.clone());
            escrow.admin_override = true;
            escrow.resolved_by = Some(admin.id);
            self.release(tx, escrow, ReleaseReason::AdminRelease).await?;
        }

        Ok(escrows)
    }

    /// Admin override: give the buyer their money back.
    pub async fn manual_refund(
        &self,
        tx: &mut Tx,
        order_id: Uuid,
        admin: &Actor,
        resolution: &ManualResolution,
    ) -> SettlementResult<Vec<Escrow>> {
        let mut escrows = self.resolvable(tx, order_id, admin, resolution).await?;

        if !escrows.iter().any(|e| e.status.is_admin_resolvable()) {
            let first = &escrows[0];
            return Err(SettlementError::EscrowNotRefundable {
                escrow_id: first.id.to_string(),
                status: first.status.to_string(),
            });
        }

        for escrow in escrows.iter_mut().filter(|e| e.status.is_admin_resolvable()) {
            escrow.admin_notes = Some(resolution.reason.clone());
            escrow.admin_override = true;
            escrow.resolved_by = Some(admin.id);
            self.refund(tx, escrow, &resolution.reason).await?;
        }

        Ok(escrows)
    }

    /// Settle every open escrow of an order in the buyer's favour.
    ///
    /// Unfunded escrows are cancelled since no money was ever held; funded
    /// ones are refunded; already terminal ones are left alone.
    pub async fn refund_all(&self, tx: &mut Tx, order_id: Uuid, reason: &str) -> SettlementResult<Vec<Escrow>> {
        let mut escrows = tx.store().escrows_for_order(order_id).await?;

        for escrow in escrows.iter_mut() {
            match escrow.status {
                EscrowStatus::Pending => {
                    let now = tx.now();
                    escrow.transition(EscrowStatus::Cancelled, now)?;
                    tx.store().update_escrow(escrow).await?;
                    tx.emit(SettlementEvent::EscrowCancelled {
                        escrow_id: escrow.id,
                        order_id: escrow.order_id,
                        timestamp: now.timestamp(),
                    });
                    info!("Escrow {} cancelled before funding", escrow.id);
                }
                status if status.is_admin_resolvable() => {
                    self.refund(tx, escrow, reason).await?;
                }
                _ => {}
            }
        }

        Ok(escrows)
    }

    /// Freeze the order's held funds while a dispute is open.
    pub async fn open_dispute(&self, tx: &mut Tx, order_id: Uuid, reason: &str) -> SettlementResult<Vec<Escrow>> {
        let mut escrows = tx.store().escrows_for_order(order_id).await?;
        if escrows.is_empty() {
            return Err(SettlementError::EscrowNotFound(format!("order {}", order_id)));
        }

        let disputable = |status: EscrowStatus| {
            matches!(status, EscrowStatus::Funded | EscrowStatus::PendingConfirmation)
        };
        if !escrows.iter().any(|e| disputable(e.status)) {
            return Err(SettlementError::InvalidTransition {
                from: escrows[0].status.to_string(),
                to: EscrowStatus::Disputed.to_string(),
            });
        }

        let now = tx.now();
        for escrow in escrows.iter_mut().filter(|e| disputable(e.status)) {
            escrow.transition(EscrowStatus::Disputed, now)?;
            escrow.dispute_reason = Some(reason.to_string());
            tx.store().update_escrow(escrow).await?;
            tx.emit(SettlementEvent::EscrowDisputed {
                escrow_id: escrow.id,
                order_id: escrow.order_id,
                reason: reason.to_string(),
                timestamp: now.timestamp(),
            });
            info!("Escrow {} disputed: {}", escrow.id, reason);
        }

        Ok(escrows)
    }

    /// Release one escrow whose confirmation deadline has passed.
    /// The record is re-read, so a stale sweep candidate is rejected here.
    pub async fn release_if_due(&self, tx: &mut Tx, escrow_id: Uuid) -> SettlementResult<Escrow> {
        let mut escrow = self.load(tx, escrow_id).await?;

        if !escrow.is_due_for_auto_release(tx.now()) {
            return Err(SettlementError::EscrowNotReleasable {
                escrow_id: escrow_id.to_string(),
                status: match escrow.status {
                    EscrowStatus::PendingConfirmation => "pending_confirmation (deadline not reached)".to_string(),
                    other => other.to_string(),
                },
            });
        }

        self.release(tx, &mut escrow, ReleaseReason::AutoRelease).await?;
        Ok(escrow)
    }

    async fn load(&self, tx: &mut Tx, escrow_id: Uuid) -> SettlementResult<Escrow> {
        tx.store()
            .find_escrow(escrow_id)
            .await?
            .ok_or_else(|| SettlementError::EscrowNotFound(escrow_id.to_string()))
    }

    async fn resolvable(
        &self,
        tx: &mut Tx,
        order_id: Uuid,
        admin: &Actor,
        resolution: &ManualResolution,
    ) -> SettlementResult<Vec<Escrow>> {
        if !admin.is_admin() {
            return Err(SettlementError::Unauthorized(
                "only an admin may settle escrow manually".to_string(),
            ));
        }
        if resolution.reason.trim().is_empty() {
            return Err(SettlementError::Validation("a reason is required".to_string()));
        }

        let escrows: Vec<Escrow> = tx.store()
            .escrows_for_order(order_id)
            .await?
            .into_iter()
            .filter(|e| resolution.vendor_id.is_none_or(|vendor_id| e.vendor_id == vendor_id))
            .collect();

        if escrows.is_empty() {
            return Err(SettlementError::EscrowNotFound(format!("order {}", order_id)));
        }
        Ok(escrows)
    }

    async fn release(&self, tx: &mut Tx, escrow: &mut Escrow, reason: ReleaseReason) -> SettlementResult<()> {
        let now = tx.now();
        escrow.transition(EscrowStatus::ReleasedToVendor, now)?;
        escrow.release_reason = Some(reason);
        tx.store().update_escrow(escrow).await?;
        tx.emit(SettlementEvent::EscrowReleased {
            escrow_id: escrow.id,
            order_id: escrow.order_id,
            vendor_id: escrow.vendor_id,
            amount: escrow.amount,
            reason: reason.as_str().to_string(),
            timestamp: now.timestamp(),
        });
        info!("Escrow {} released to vendor {} ({})", escrow.id, escrow.vendor_id, reason.as_str());
        Ok(())
    }

    async fn refund(&self, tx: &mut Tx, escrow: &mut Escrow, reason: &str) -> SettlementResult<()> {
        let now = tx.now();
        escrow.transition(EscrowStatus::RefundedToBuyer, now)?;
        escrow.refund_reason = Some(reason.to_string());
        tx.store().update_escrow(escrow).await?;
        tx.emit(SettlementEvent::EscrowRefunded {
            escrow_id: escrow.id,
            order_id: escrow.order_id,
            buyer_id: escrow.buyer_id,
            amount: escrow.amount,
            reason: reason.to_string(),
            timestamp: now.timestamp(),
        });
        info!("Escrow {} refunded to buyer {}: {}", escrow.id, escrow.buyer_id, reason);
        Ok(())
    }
}
