use crate::escrow::EscrowLifecycleManager;
use crate::models::{CheckoutItem, CheckoutRequest, Escrow, Order, OrderItem, OrderStatus};
use crate::policy::SettlementPolicy;
use crate::repository::Tx;
use farmgate_catalog::ProductError;
use farmgate_core::{Actor, PaymentOutcome, Role, SettlementError, SettlementResult};
use farmgate_shared::SettlementEvent;
use tracing::{debug, info};
use uuid::Uuid;

/// Manages order lifecycle and state transitions
#[derive(Debug, Clone)]
pub struct OrderLifecycleManager {
    escrows: EscrowLifecycleManager,
    currency: String,
}

impl OrderLifecycleManager {
    pub fn new(policy: &SettlementPolicy) -> Self {
        Self {
            escrows: EscrowLifecycleManager::new(policy),
            currency: policy.currency.clone(),
        }
    }

    pub fn escrows(&self) -> &EscrowLifecycleManager {
        &self.escrows
    }

    /// Checkout: validate the cart, write the order, its per-vendor escrows
    /// and every stock decrement in the caller's unit of work.
    pub async fn create_order(
        &self,
        tx: &mut Tx,
        buyer_id: Uuid,
        request: CheckoutRequest,
    ) -> SettlementResult<(Order, Vec<Escrow>)> {
        if request.items.is_empty() {
            return Err(SettlementError::Validation("order must contain at least one item".to_string()));
        }
        if let Some(item) = request.items.iter().find(|item| item.quantity <= 0) {
            return Err(SettlementError::Validation(format!(
                "quantity for product {} must be positive, got {}",
                item.product_id, item.quantity
            )));
        }

        let buyer = tx.store()
            .find_user(buyer_id)
            .await?
            .ok_or(SettlementError::UserNotFound(buyer_id))?;
        if buyer.role != Role::Buyer || !buyer.is_active {
            return Err(SettlementError::Unauthorized(format!(
                "user {} is not an active buyer",
                buyer_id
            )));
        }

        let requested = requested_quantities(&request.items)?;

        let mut products = Vec::with_capacity(requested.len());
        for (product_id, quantity) in &requested {
            let product = tx.store()
                .find_product(*product_id)
                .await?
                .ok_or(SettlementError::ProductNotFound(*product_id))?;
            product.ensure_orderable(*quantity).map_err(product_error)?;
            products.push(product);
        }

        let mut items = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let product = products.iter()
                .find(|p| p.id == line.product_id)
                .ok_or(SettlementError::ProductNotFound(line.product_id))?;
            let subtotal = product.subtotal(line.quantity).map_err(product_error)?;
            items.push(OrderItem::new(
                product.id,
                product.vendor_id,
                product.name.clone(),
                line.quantity,
                product.unit_price,
                subtotal,
            ));
        }

        let now = tx.now();
        let order = Order::new(
            buyer_id,
            items,
            request.shipping_address,
            request.payment_method,
            request.notes,
            &self.currency,
            now,
        )?;
        tx.store().insert_order(&order).await?;

        let escrows = self.escrows.open_escrows(tx, &order).await?;

        for item in &order.items {
            let left = tx.store().decrement_stock(item.product_id, item.quantity).await?;
            debug!("Stock for {} down to {}", item.product_id, left);
        }

        tx.emit(SettlementEvent::OrderPlaced {
            order_id: order.id,
            order_number: order.order_number.clone(),
            buyer_id,
            total_amount: order.total_amount,
            currency: order.currency.clone(),
            escrow_count: escrows.len(),
            timestamp: now.timestamp(),
        });
        info!(
            "Order {} placed by {}: {} {} across {} vendor(s)",
            order.order_number,
            buyer_id,
            order.total_amount,
            order.currency,
            escrows.len()
        );

        Ok((order, escrows))
    }

    /// Generic transition, with the escrow and stock side effects of the target status.
    pub async fn update_status(
        &self,
        tx: &mut Tx,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> SettlementResult<Order> {
        let mut order = self.load(tx, order_id).await?;
        self.apply(tx, &mut order, new_status).await?;
        Ok(order)
    }

    /// Buyer, owning vendor or admin calls the order off before it ships.
    pub async fn cancel_order(
        &self,
        tx: &mut Tx,
        order_id: Uuid,
        actor: &Actor,
        reason: &str,
    ) -> SettlementResult<Order> {
        let mut order = self.load(tx, order_id).await?;

        let permitted = actor.is_admin()
            || (actor.role == Role::Buyer && order.buyer_id == actor.id)
            || (actor.role == Role::Vendor && order.involves_vendor(actor.id));
        if !permitted {
            return Err(SettlementError::Unauthorized(format!(
                "{} {} may not cancel order {}",
                actor.role.as_str(),
                actor.id,
                order_id
            )));
        }
        if !order.status.is_cancellable() {
            return Err(SettlementError::OrderNotCancellable {
                order_id,
                status: order.status.to_string(),
            });
        }

        order.cancellation_reason = Some(reason.to_string());
        self.apply(tx, &mut order, OrderStatus::Cancelled).await?;
        Ok(order)
    }

    /// Apply the payment gateway's verdict. Replays of an applied verdict are no-ops.
    pub async fn update_payment_status(
        &self,
        tx: &mut Tx,
        order_id: Uuid,
        outcome: PaymentOutcome,
    ) -> SettlementResult<Order> {
        let mut order = self.load(tx, order_id).await?;

        match outcome {
            PaymentOutcome::Paid if order.paid_at.is_some() => {
                debug!("Payment for {} already applied", order.order_number);
            }
            PaymentOutcome::Failed if order.status == OrderStatus::PaymentFailed => {
                debug!("Payment failure for {} already recorded", order.order_number);
            }
            PaymentOutcome::Paid => self.apply(tx, &mut order, OrderStatus::Paid).await?,
            PaymentOutcome::Failed => self.apply(tx, &mut order, OrderStatus::PaymentFailed).await?,
        }

        Ok(order)
    }

    async fn apply(&self, tx: &mut Tx, order: &mut Order, next: OrderStatus) -> SettlementResult<()> {
        let now = tx.now();
        let previous = order.transition(next, now)?;

        match next {
            OrderStatus::Paid => {
                order.paid_at.get_or_insert(now);
                self.escrows.fund_order(tx, order).await?;
            }
            OrderStatus::Delivered => {
                self.escrows.mark_delivered(tx, order).await?;
            }
            OrderStatus::Cancelled | OrderStatus::Refunded => {
                let reason = order.cancellation_reason
                    .clone()
                    .unwrap_or_else(|| format!("order_{}", next.as_str()));
                self.escrows.refund_all(tx, order.id, &reason).await?;
                self.restore_stock(tx, order).await?;
            }
            _ => {}
        }

        tx.store().update_order(order).await?;
        tx.emit(SettlementEvent::OrderStatusChanged {
            order_id: order.id,
            from: previous.to_string(),
            to: next.to_string(),
            timestamp: now.timestamp(),
        });
        info!("Order {} moved {} -> {}", order.order_number, previous, next);
        Ok(())
    }

    /// Put every line's quantity back, at most once per order.
    async fn restore_stock(&self, tx: &mut Tx, order: &mut Order) -> SettlementResult<()> {
        if order.stock_restored_at.is_some() {
            return Ok(());
        }
        let mut items: Vec<&OrderItem> = order.items.iter().collect();
        items.sort_by_key(|item| item.product_id);
        for item in items {
            tx.store().restore_stock(item.product_id, item.quantity).await?;
        }
        order.stock_restored_at = Some(tx.now());
        Ok(())
    }

    async fn load(&self, tx: &mut Tx, order_id: Uuid) -> SettlementResult<Order> {
        tx.store()
            .find_order(order_id)
            .await?
            .ok_or(SettlementError::OrderNotFound(order_id))
    }
}

/// Quantity per distinct product, sorted by product id. Product rows are
/// locked in this order, so concurrent checkouts never wait on each other in a cycle.
fn requested_quantities(items: &[CheckoutItem]) -> SettlementResult<Vec<(Uuid, i32)>> {
    let mut requested: Vec<(Uuid, i32)> = Vec::new();
    for item in items {
        match requested.iter_mut().find(|(id, _)| *id == item.product_id) {
            Some((_, total)) => {
                *total = total.checked_add(item.quantity).ok_or_else(|| {
                    SettlementError::Validation(format!("quantity overflow for product {}", item.product_id))
                })?
            }
            None => requested.push((item.product_id, item.quantity)),
        }
    }
    requested.sort_by_key(|(id, _)| *id);
    Ok(requested)
}

fn product_error(err: ProductError) -> SettlementError {
    match err {
        ProductError::NotAvailable(id) => match id.parse::<Uuid>() {
            Ok(id) => SettlementError::ProductUnavailable(id),
            Err(_) => SettlementError::Validation(format!("product {} is not available", id)),
        },
        ProductError::InsufficientStock { product_id, requested, available } => {
            SettlementError::InsufficientStock { product_id, requested, available }
        }
        other => SettlementError::Validation(other.to_string()),
    }
}
