use crate::escrow::ManualResolution;
use crate::manager::OrderLifecycleManager;
use crate::models::{CheckoutRequest, Escrow, Order, OrderStatus};
use crate::policy::SettlementPolicy;
use crate::repository::{SettlementStore, Tx};
use farmgate_core::{
    Actor, Clock, Notifier, PaymentOutcome, Role, SettlementError, SettlementResult, SystemClock,
    TracingNotifier,
};
use farmgate_shared::SettlementEvent;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

/// Result of a successful checkout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderReceipt {
    pub order: Order,
    pub escrows: Vec<Escrow>,
}

/// Escrow view of one order, filtered to what the requester may see
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscrowStatusView {
    pub order_id: Uuid,
    pub order_status: OrderStatus,
    pub escrows: Vec<Escrow>,
}

/// The settlement facade. Every operation runs in a single unit of work,
/// re-reads the records it touches, and publishes its events only after commit.
pub struct SettlementOrchestrator {
    pub(crate) store: Arc<dyn SettlementStore>,
    pub(crate) orders: OrderLifecycleManager,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    outbox: OnceLock<mpsc::UnboundedSender<Outbox>>,
}

/// Work for the background publisher, handled in arrival order
enum Outbox {
    Publish(Vec<SettlementEvent>),
    Flush(oneshot::Sender<()>),
}

impl SettlementOrchestrator {
    pub fn new(store: Arc<dyn SettlementStore>, policy: SettlementPolicy) -> Self {
        Self {
            store,
            orders: OrderLifecycleManager::new(&policy),
            clock: Arc::new(SystemClock),
            notifier: Arc::new(TracingNotifier),
            outbox: OnceLock::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub async fn create_order(&self, actor: &Actor, request: CheckoutRequest) -> SettlementResult<OrderReceipt> {
        if actor.role != Role::Buyer {
            return Err(SettlementError::Unauthorized("only buyers can place orders".to_string()));
        }

        let mut tx = self.begin().await?;
        let result = self.orders
            .create_order(&mut tx, actor.id, request)
            .await
            .map(|(order, escrows)| OrderReceipt { order, escrows });
        self.finish(tx, result).await
    }

    pub async fn get_order(&self, order_id: Uuid, actor: &Actor) -> SettlementResult<Order> {
        let mut tx = self.begin().await?;
        let result: SettlementResult<Order> = async {
            let order = Self::load_order(&mut tx, order_id).await?;
            let visible = actor.is_admin()
                || (actor.role == Role::Buyer && order.buyer_id == actor.id)
                || (actor.role == Role::Vendor && order.involves_vendor(actor.id));
            if !visible {
                return Err(SettlementError::Unauthorized(format!("order {} is not visible to {}", order_id, actor.id)));
            }
            Ok(order)
        }
        .await;
        self.finish(tx, result).await
    }

    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        actor: &Actor,
    ) -> SettlementResult<Order> {
        let mut tx = self.begin().await?;
        let result: SettlementResult<Order> = async {
            let order = Self::load_order(&mut tx, order_id).await?;
            let permitted = actor.is_admin() || (actor.role == Role::Vendor && order.involves_vendor(actor.id));
            if !permitted {
                return Err(SettlementError::Unauthorized(format!(
                    "{} {} may not change the status of order {}",
                    actor.role.as_str(),
                    actor.id,
                    order_id
                )));
            }
            if new_status.is_payment_outcome() && !actor.is_machine_or_admin() {
                return Err(SettlementError::Unauthorized(
                    "payment status comes from the gateway or an admin".to_string(),
                ));
            }
            self.orders.update_status(&mut tx, order_id, new_status).await
        }
        .await;
        self.finish(tx, result).await
    }

    pub async fn cancel_order(&self, order_id: Uuid, actor: &Actor, reason: &str) -> SettlementResult<Order> {
        let mut tx = self.begin().await?;
        let result = self.orders.cancel_order(&mut tx, order_id, actor, reason).await;
        self.finish(tx, result).await
    }

    /// Entry point for the payment gateway; safe to replay.
    pub async fn update_payment_status(
        &self,
        order_id: Uuid,
        outcome: PaymentOutcome,
        actor: &Actor,
    ) -> SettlementResult<Order> {
        if !actor.is_machine_or_admin() {
            return Err(SettlementError::Unauthorized(
                "payment status comes from the gateway or an admin".to_string(),
            ));
        }

        let mut tx = self.begin().await?;
        let result = self.orders.update_payment_status(&mut tx, order_id, outcome).await;
        self.finish(tx, result).await
    }

    pub async fn confirm_delivery(&self, escrow_id: Uuid, actor: &Actor) -> SettlementResult<Escrow> {
        let mut tx = self.begin().await?;
        let result = self.orders.escrows().confirm_delivery(&mut tx, escrow_id, actor).await;
        self.finish(tx, result).await
    }

    pub async fn manual_release(
        &self,
        order_id: Uuid,
        actor: &Actor,
        resolution: ManualResolution,
    ) -> SettlementResult<Vec<Escrow>> {
        let mut tx = self.begin().await?;
        let result = self.orders.escrows().manual_release(&mut tx, order_id, actor, &resolution).await;
        self.finish(tx, result).await
    }

    pub async fn manual_refund(
        &self,
        order_id: Uuid,
        actor: &Actor,
        resolution: ManualResolution,
    ) -> SettlementResult<Vec<Escrow>> {
        let mut tx = self.begin().await?;
        let result = self.orders.escrows().manual_refund(&mut tx, order_id, actor, &resolution).await;
        self.finish(tx, result).await
    }

    /// Freeze the order's held funds until an admin settles them.
    pub async fn open_dispute(&self, order_id: Uuid, actor: &Actor, reason: &str) -> SettlementResult<Vec<Escrow>> {
        if reason.trim().is_empty() {
            return Err(SettlementError::Validation("a dispute needs a reason".to_string()));
        }

        let mut tx = self.begin().await?;
        let result: SettlementResult<Vec<Escrow>> = async {
            let order = Self::load_order(&mut tx, order_id).await?;
            let permitted = actor.is_admin() || (actor.role == Role::Buyer && order.buyer_id == actor.id);
            if !permitted {
                return Err(SettlementError::Unauthorized(format!(
                    "only the buyer or an admin may dispute order {}",
                    order_id
                )));
            }
            self.orders.escrows().open_dispute(&mut tx, order_id, reason).await
        }
        .await;
        self.finish(tx, result).await
    }

    /// The buyer sees every escrow of the order, a vendor only their own.
    pub async fn get_escrow_status(&self, order_id: Uuid, requester: &Actor) -> SettlementResult<EscrowStatusView> {
        let mut tx = self.begin().await?;
        let result: SettlementResult<EscrowStatusView> = async {
            let order = Self::load_order(&mut tx, order_id).await?;
            let escrows = tx.store().escrows_for_order(order_id).await?;

            let escrows = match requester.role {
                Role::Buyer if order.buyer_id == requester.id => escrows,
                Role::Vendor if order.involves_vendor(requester.id) => {
                    escrows.into_iter().filter(|e| e.vendor_id == requester.id).collect()
                }
                _ => {
                    return Err(SettlementError::Unauthorized(format!(
                        "escrows of order {} are not visible to {}",
                        order_id, requester.id
                    )))
                }
            };

            Ok(EscrowStatusView { order_id, order_status: order.status, escrows })
        }
        .await;
        self.finish(tx, result).await
    }

    pub(crate) fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    pub(crate) async fn begin(&self) -> SettlementResult<Tx> {
        let uow = self.store
            .begin()
            .await
            .map_err(|e| SettlementError::TransactionAborted(e.to_string()))?;
        Ok(Tx::new(uow, self.now()))
    }

    /// Commit on success, roll back on failure, then queue committed events for publishing.
    pub(crate) async fn finish<T>(&self, tx: Tx, result: SettlementResult<T>) -> SettlementResult<T> {
        match result {
            Ok(value) => {
                let events = tx
                    .commit()
                    .await
                    .map_err(|e| SettlementError::TransactionAborted(e.to_string()))?;
                self.dispatch(events);
                Ok(value)
            }
            Err(err) => {
                if let Err(e) = tx.rollback().await {
                    warn!("Rollback failed: {}", e);
                }
                debug!("Unit of work rolled back: {}", err);
                Err(err)
            }
        }
    }

    /// Wait until every event committed so far has been handed to the notifier.
    pub async fn flush_events(&self) {
        let (ack, done) = oneshot::channel();
        if self.outbox().send(Outbox::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    fn dispatch(&self, events: Vec<SettlementEvent>) {
        if events.is_empty() {
            return;
        }
        let count = events.len();
        if self.outbox().send(Outbox::Publish(events)).is_err() {
            warn!("Event publisher is gone, dropped {} event(s)", count);
        }
    }

    /// The publisher task starts on first use, on the caller's runtime.
    fn outbox(&self) -> &mpsc::UnboundedSender<Outbox> {
        self.outbox.get_or_init(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            tokio::spawn(publish_events(self.notifier.clone(), receiver));
            sender
        })
    }

    async fn load_order(tx: &mut Tx, order_id: Uuid) -> SettlementResult<Order> {
        tx.store()
            .find_order(order_id)
            .await?
            .ok_or(SettlementError::OrderNotFound(order_id))
    }
}

async fn publish_events(notifier: Arc<dyn Notifier>, mut outbox: mpsc::UnboundedReceiver<Outbox>) {
    while let Some(work) = outbox.recv().await {
        match work {
            Outbox::Publish(events) => {
                for event in &events {
                    if let Err(e) = notifier.publish(event).await {
                        warn!("Failed to publish {} for order {}: {}", event.name(), event.order_id(), e);
                    }
                }
            }
            Outbox::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}
