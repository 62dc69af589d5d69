use chrono::{Duration, TimeZone, Utc};
use farmgate_catalog::{Product, ProductCategory};
use async_trait::async_trait;
use farmgate_core::{
    Actor, Clock, ManualClock, Notifier, PaymentMethod, PaymentOutcome, RecordingNotifier, Role, SettlementError, User,
};
use farmgate_order::{
    CheckoutItem, CheckoutRequest, EscrowStatus, InMemoryStore, ManualResolution, OrderReceipt, OrderStatus,
    ReleaseReason, SettlementOrchestrator, SettlementPolicy, ShippingAddress,
};
use farmgate_shared::{Masked, SettlementEvent};
use std::sync::Arc;
use uuid::Uuid;

struct Market {
    store: InMemoryStore,
    orchestrator: SettlementOrchestrator,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
    buyer: Actor,
    admin: Actor,
    vendor_a: Uuid,
    vendor_b: Uuid,
    tomatoes: Product,
    kale: Product,
    onions: Product,
}

async fn market() -> Market {
    let store = InMemoryStore::new();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()));
    let notifier = Arc::new(RecordingNotifier::new());

    let buyer = User::new("Achieng", Role::Buyer);
    store.add_user(buyer.clone()).await;

    let vendor_a = Uuid::new_v4();
    let vendor_b = Uuid::new_v4();
    let tomatoes = Product::new(vendor_a, "Tomatoes".into(), ProductCategory::Vegetables, "crate".into(), 50, 20);
    let onions = Product::new(vendor_a, "Red onions".into(), ProductCategory::Vegetables, "kg".into(), 10, 30);
    let kale = Product::new(vendor_b, "Sukuma wiki".into(), ProductCategory::Vegetables, "bunch".into(), 50, 15);
    for product in [&tomatoes, &onions, &kale] {
        store.add_product(product.clone()).await;
    }

    let orchestrator = SettlementOrchestrator::new(Arc::new(store.clone()), SettlementPolicy::default())
        .with_clock(clock.clone())
        .with_notifier(notifier.clone());

    Market {
        store,
        orchestrator,
        clock,
        notifier,
        buyer: Actor::buyer(buyer.id),
        admin: Actor::admin(Uuid::new_v4()),
        vendor_a,
        vendor_b,
        tomatoes,
        kale,
        onions,
    }
}

fn checkout(lines: &[(Uuid, i32)], payment_method: PaymentMethod) -> CheckoutRequest {
    CheckoutRequest {
        items: lines
            .iter()
            .map(|&(product_id, quantity)| CheckoutItem { product_id, quantity })
            .collect(),
        shipping_address: ShippingAddress {
            recipient: Masked::new("Achieng Odhiambo".to_string()),
            phone: Masked::new("+254722123456".to_string()),
            line1: "Kondele Market, stall 7".to_string(),
            city: "Kisumu".to_string(),
            region: None,
            country: "KE".to_string(),
        },
        payment_method,
        notes: Some("Deliver before noon".to_string()),
    }
}

impl Market {
    /// Scenario A cart: vendor A subtotal 100, vendor B subtotal 50
    async fn place_two_vendor_order(&self, method: PaymentMethod) -> OrderReceipt {
        let request = checkout(&[(self.tomatoes.id, 2), (self.kale.id, 1)], method);
        self.orchestrator.create_order(&self.buyer, request).await.unwrap()
    }

    async fn pay(&self, order_id: Uuid) {
        self.orchestrator
            .update_payment_status(order_id, PaymentOutcome::Paid, &Actor::system())
            .await
            .unwrap();
    }

    async fn walk_to(&self, order_id: Uuid, path: &[OrderStatus]) {
        for status in path {
            self.orchestrator.update_order_status(order_id, *status, &self.admin).await.unwrap();
        }
    }

    async fn deliver_prepaid(&self, order_id: Uuid) {
        self.pay(order_id).await;
        self.walk_to(
            order_id,
            &[OrderStatus::Confirmed, OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered],
        )
        .await;
    }

    async fn events(&self) -> Vec<SettlementEvent> {
        self.orchestrator.flush_events().await;
        self.notifier.events()
    }

    async fn count(&self, name: &str) -> usize {
        self.events().await.iter().filter(|e| e.name() == name).count()
    }
}

#[tokio::test]
async fn test_checkout_splits_order_per_vendor() {
    let m = market().await;
    let receipt = m.place_two_vendor_order(PaymentMethod::Card).await;

    assert_eq!(receipt.order.total_amount, 150);
    assert_eq!(receipt.order.status, OrderStatus::PendingPayment);
    assert_eq!(receipt.escrows.len(), 2);
    assert!(receipt.escrows.iter().all(|e| e.status == EscrowStatus::Pending));

    let amounts: Vec<_> = receipt.escrows.iter().map(|e| (e.vendor_id, e.amount)).collect();
    assert_eq!(amounts, vec![(m.vendor_a, 100), (m.vendor_b, 50)]);
    assert_eq!(receipt.escrows.iter().map(|e| e.amount).sum::<i64>(), receipt.order.total_amount);

    assert_eq!(m.store.stock(m.tomatoes.id).await, Some(18));
    assert_eq!(m.store.stock(m.kale.id).await, Some(14));
    assert!(matches!(m.events().await.first(), Some(SettlementEvent::OrderPlaced { escrow_count: 2, .. })));
}

#[tokio::test]
async fn test_payment_funds_every_escrow() {
    let m = market().await;
    let receipt = m.place_two_vendor_order(PaymentMethod::MobileMoney).await;

    m.pay(receipt.order.id).await;

    let order = m.store.order(receipt.order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert!(order.paid_at.is_some());
    let escrows = m.store.escrows_for(order.id).await;
    assert!(escrows.iter().all(|e| e.status == EscrowStatus::Funded && e.funded_at.is_some()));

    // Gateway retries are harmless
    m.pay(receipt.order.id).await;
    assert_eq!(m.count("escrow_funded").await, 2);
    assert_eq!(m.store.order(order.id).await.unwrap().paid_at, order.paid_at);
}

#[tokio::test]
async fn test_delivery_starts_the_countdown() {
    let m = market().await;
    let receipt = m.place_two_vendor_order(PaymentMethod::Card).await;

    m.deliver_prepaid(receipt.order.id).await;

    let delivered_at = m.clock.now();
    for escrow in m.store.escrows_for(receipt.order.id).await {
        assert_eq!(escrow.status, EscrowStatus::PendingConfirmation);
        assert_eq!(escrow.delivered_at, Some(delivered_at));
        assert_eq!(escrow.confirmation_deadline, Some(delivered_at + Duration::days(3)));
    }
}

#[tokio::test]
async fn test_buyer_confirmation_releases_only_that_escrow() {
    let m = market().await;
    let receipt = m.place_two_vendor_order(PaymentMethod::Card).await;
    m.deliver_prepaid(receipt.order.id).await;

    let first = receipt.escrows[0].id;
    let released = m.orchestrator.confirm_delivery(first, &m.buyer).await.unwrap();
    assert_eq!(released.status, EscrowStatus::ReleasedToVendor);
    assert_eq!(released.release_reason, Some(ReleaseReason::BuyerConfirmed));
    assert!(released.released_at.is_some());

    let sibling = m.store.escrow(receipt.escrows[1].id).await.unwrap();
    assert_eq!(sibling.status, EscrowStatus::PendingConfirmation);
}

#[tokio::test]
async fn test_sweep_releases_past_deadline() {
    let m = market().await;
    let receipt = m.place_two_vendor_order(PaymentMethod::Card).await;
    m.deliver_prepaid(receipt.order.id).await;

    // Not due yet
    m.clock.advance(Duration::days(2));
    let outcomes = m.orchestrator.sweep_auto_release(&Actor::system()).await.unwrap();
    assert!(outcomes.is_empty());

    m.clock.advance(Duration::days(1) + Duration::seconds(1));
    let outcomes = m.orchestrator.sweep_auto_release(&Actor::system()).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.success && o.order_id == receipt.order.id));

    for escrow in m.store.escrows_for(receipt.order.id).await {
        assert_eq!(escrow.status, EscrowStatus::ReleasedToVendor);
        assert_eq!(escrow.release_reason, Some(ReleaseReason::AutoRelease));
    }
}

#[tokio::test]
async fn test_shipped_order_is_not_cancellable() {
    let m = market().await;
    let receipt = m.place_two_vendor_order(PaymentMethod::Card).await;
    m.pay(receipt.order.id).await;
    m.walk_to(receipt.order.id, &[OrderStatus::Confirmed, OrderStatus::Processing, OrderStatus::Shipped])
        .await;

    let before = m.store.order(receipt.order.id).await.unwrap();
    let escrows_before = m.store.escrows_for(receipt.order.id).await;

    let err = m.orchestrator.cancel_order(receipt.order.id, &m.buyer, "too slow").await.unwrap_err();
    assert!(matches!(err, SettlementError::OrderNotCancellable { .. }));
    assert_eq!(m.store.order(receipt.order.id).await.unwrap(), before);
    assert_eq!(m.store.escrows_for(receipt.order.id).await, escrows_before);
}

#[tokio::test]
async fn test_failed_stock_write_leaves_nothing_behind() {
    let m = market().await;
    m.store.fail_stock_decrements(m.onions.id).await;

    let request = checkout(&[(m.tomatoes.id, 1), (m.kale.id, 1), (m.onions.id, 3)], PaymentMethod::Card);
    let err = m.orchestrator.create_order(&m.buyer, request).await.unwrap_err();

    assert!(matches!(err, SettlementError::TransactionAborted(_)));
    assert_eq!(m.store.order_count().await, 0);
    assert_eq!(m.store.escrow_count().await, 0);
    assert_eq!(m.store.stock(m.tomatoes.id).await, Some(20));
    assert_eq!(m.store.stock(m.kale.id).await, Some(15));
    assert_eq!(m.store.stock(m.onions.id).await, Some(30));
    assert!(m.events().await.is_empty());
}

#[tokio::test]
async fn test_sweep_reports_failures_and_continues() {
    let m = market().await;
    let receipt = m.place_two_vendor_order(PaymentMethod::Card).await;
    m.deliver_prepaid(receipt.order.id).await;

    let broken = receipt.escrows[0].id;
    m.store.fail_escrow_updates(broken).await;
    m.clock.advance(Duration::days(4));

    let outcomes = m.orchestrator.sweep_auto_release(&Actor::system()).await.unwrap();
    assert_eq!(outcomes.len(), 2);

    let failed = outcomes.iter().find(|o| o.escrow_id == broken).unwrap();
    assert!(!failed.success);
    assert!(!failed.message.is_empty());
    assert!(outcomes.iter().any(|o| o.escrow_id == receipt.escrows[1].id && o.success));

    assert_eq!(m.store.escrow(broken).await.unwrap().status, EscrowStatus::PendingConfirmation);
    assert_eq!(
        m.store.escrow(receipt.escrows[1].id).await.unwrap().status,
        EscrowStatus::ReleasedToVendor
    );
}

#[tokio::test]
async fn test_release_and_confirm_race_has_one_winner() {
    let m = market().await;
    let request = checkout(&[(m.tomatoes.id, 2)], PaymentMethod::Card);
    let receipt = m.orchestrator.create_order(&m.buyer, request).await.unwrap();
    m.deliver_prepaid(receipt.order.id).await;
    let escrow_id = receipt.escrows[0].id;

    let resolution = ManualResolution::new("vendor escalation");
    let (release, confirm) = tokio::join!(
        m.orchestrator.manual_release(receipt.order.id, &m.admin, resolution),
        m.orchestrator.confirm_delivery(escrow_id, &m.buyer),
    );

    match (&release, &confirm) {
        (Ok(_), Err(SettlementError::NotConfirmable { .. })) => {}
        (Err(SettlementError::EscrowNotReleasable { .. }), Ok(_)) => {}
        other => panic!("expected exactly one winner, got {other:?}"),
    }
    assert_eq!(m.count("escrow_released").await, 1);
    assert_eq!(m.store.escrow(escrow_id).await.unwrap().status, EscrowStatus::ReleasedToVendor);
}

#[tokio::test]
async fn test_cancellation_restocks_and_settles_escrows() {
    let m = market().await;
    let receipt = m.place_two_vendor_order(PaymentMethod::CashOnDelivery).await;
    assert_eq!(receipt.order.status, OrderStatus::Pending);

    m.walk_to(receipt.order.id, &[OrderStatus::Confirmed]).await;
    let vendor = Actor::vendor(m.vendor_b);
    let order = m.orchestrator.cancel_order(receipt.order.id, &vendor, "kale harvest failed").await.unwrap();

    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(order.stock_restored_at.is_some());
    assert_eq!(m.store.stock(m.tomatoes.id).await, Some(20));
    assert_eq!(m.store.stock(m.kale.id).await, Some(15));
    assert!(m.store
        .escrows_for(order.id)
        .await
        .iter()
        .all(|e| e.status == EscrowStatus::Cancelled));
}

#[tokio::test]
async fn test_refund_after_delivery_returns_funds_and_stock() {
    let m = market().await;
    let receipt = m.place_two_vendor_order(PaymentMethod::Card).await;
    m.deliver_prepaid(receipt.order.id).await;

    m.orchestrator.confirm_delivery(receipt.escrows[0].id, &m.buyer).await.unwrap();
    m.walk_to(receipt.order.id, &[OrderStatus::Refunded]).await;

    let escrows = m.store.escrows_for(receipt.order.id).await;
    assert_eq!(escrows[0].status, EscrowStatus::ReleasedToVendor);
    assert_eq!(escrows[1].status, EscrowStatus::RefundedToBuyer);
    assert_eq!(escrows[1].refund_reason.as_deref(), Some("order_refunded"));
    assert_eq!(m.store.stock(m.tomatoes.id).await, Some(20));
}

#[tokio::test]
async fn test_cash_on_delivery_is_funded_at_the_door() {
    let m = market().await;
    let receipt = m.place_two_vendor_order(PaymentMethod::CashOnDelivery).await;

    m.walk_to(
        receipt.order.id,
        &[OrderStatus::Confirmed, OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered],
    )
    .await;

    for escrow in m.store.escrows_for(receipt.order.id).await {
        assert_eq!(escrow.status, EscrowStatus::PendingConfirmation);
        assert!(escrow.funded_at.is_some());
    }
}

#[tokio::test]
async fn test_dispute_blocks_the_sweep_until_an_admin_decides() {
    let m = market().await;
    let receipt = m.place_two_vendor_order(PaymentMethod::Card).await;
    m.deliver_prepaid(receipt.order.id).await;

    let disputed = m.orchestrator
        .open_dispute(receipt.order.id, &m.buyer, "tomatoes arrived crushed")
        .await
        .unwrap();
    assert!(disputed.iter().all(|e| e.status == EscrowStatus::Disputed));

    m.clock.advance(Duration::days(5));
    assert!(m.orchestrator.sweep_auto_release(&Actor::system()).await.unwrap().is_empty());

    let resolution = ManualResolution::for_vendor("photos confirm damage", m.vendor_a);
    let refunded = m.orchestrator.manual_refund(receipt.order.id, &m.admin, resolution).await.unwrap();
    assert_eq!(refunded.len(), 1);
    assert_eq!(refunded[0].status, EscrowStatus::RefundedToBuyer);

    let released = m.orchestrator
        .manual_release(receipt.order.id, &m.admin, ManualResolution::for_vendor("kale was fine", m.vendor_b))
        .await
        .unwrap();
    assert_eq!(released[0].release_reason, Some(ReleaseReason::AdminRelease));
    assert!(released[0].admin_override);

    // Order status is untouched by escrow-level settlement
    assert_eq!(m.store.order(receipt.order.id).await.unwrap().status, OrderStatus::Delivered);
}

#[tokio::test]
async fn test_escrow_visibility() {
    let m = market().await;
    let receipt = m.place_two_vendor_order(PaymentMethod::Card).await;
    let order_id = receipt.order.id;

    let view = m.orchestrator.get_escrow_status(order_id, &m.buyer).await.unwrap();
    assert_eq!(view.escrows.len(), 2);
    assert_eq!(view.order_status, OrderStatus::PendingPayment);

    let view = m.orchestrator.get_escrow_status(order_id, &Actor::vendor(m.vendor_b)).await.unwrap();
    assert_eq!(view.escrows.len(), 1);
    assert_eq!(view.escrows[0].vendor_id, m.vendor_b);

    for outsider in [m.admin, Actor::vendor(Uuid::new_v4()), Actor::buyer(Uuid::new_v4())] {
        assert!(matches!(
            m.orchestrator.get_escrow_status(order_id, &outsider).await,
            Err(SettlementError::Unauthorized(_))
        ));
    }
}

#[tokio::test]
async fn test_role_checks_at_the_facade() {
    let m = market().await;
    let receipt = m.place_two_vendor_order(PaymentMethod::Card).await;
    let order_id = receipt.order.id;

    let vendor = Actor::vendor(m.vendor_a);
    assert!(matches!(
        m.orchestrator.create_order(&vendor, checkout(&[(m.kale.id, 1)], PaymentMethod::Card)).await,
        Err(SettlementError::Unauthorized(_))
    ));
    assert!(matches!(
        m.orchestrator.update_payment_status(order_id, PaymentOutcome::Paid, &m.buyer).await,
        Err(SettlementError::Unauthorized(_))
    ));
    assert!(matches!(
        m.orchestrator.sweep_auto_release(&vendor).await,
        Err(SettlementError::Unauthorized(_))
    ));
    assert!(matches!(
        m.orchestrator.update_order_status(order_id, OrderStatus::Paid, &m.buyer).await,
        Err(SettlementError::Unauthorized(_))
    ));

    // Payment outcomes only arrive through the gateway, never from a vendor
    for outcome in [OrderStatus::Paid, OrderStatus::PaymentFailed] {
        assert!(matches!(
            m.orchestrator.update_order_status(order_id, outcome, &vendor).await,
            Err(SettlementError::Unauthorized(_))
        ));
    }
    assert_eq!(m.store.order(order_id).await.unwrap().status, OrderStatus::PendingPayment);
    assert!(m.store.escrows_for(order_id).await.iter().all(|e| e.status == EscrowStatus::Pending));

    // Owning vendor may drive the order, but only along the table
    assert!(matches!(
        m.orchestrator.update_order_status(order_id, OrderStatus::Shipped, &vendor).await,
        Err(SettlementError::InvalidTransition { .. })
    ));
    assert_eq!(m.orchestrator.get_order(order_id, &vendor).await.unwrap().id, order_id);
    assert!(matches!(
        m.orchestrator.get_order(Uuid::new_v4(), &m.admin).await,
        Err(SettlementError::OrderNotFound(_))
    ));
}

#[tokio::test]
async fn test_payment_failure_then_cancel() {
    let m = market().await;
    let receipt = m.place_two_vendor_order(PaymentMethod::BankTransfer).await;
    let order_id = receipt.order.id;

    for _ in 0..2 {
        let order = m.orchestrator
            .update_payment_status(order_id, PaymentOutcome::Failed, &Actor::system())
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::PaymentFailed);
    }
    assert_eq!(m.count("order_status_changed").await, 1);

    m.walk_to(order_id, &[OrderStatus::Cancelled]).await;
    assert_eq!(m.store.stock(m.tomatoes.id).await, Some(20));
    assert!(m.store.escrows_for(order_id).await.iter().all(|e| e.status == EscrowStatus::Cancelled));
}

/// Publishes like the recording notifier, but only after a delay
struct SlowNotifier {
    inner: RecordingNotifier,
    delay: std::time::Duration,
}

#[async_trait]
impl Notifier for SlowNotifier {
    async fn publish(
        &self,
        event: &SettlementEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tokio::time::sleep(self.delay).await;
        self.inner.publish(event).await
    }
}

#[tokio::test]
async fn test_slow_notifier_does_not_hold_up_callers() {
    let m = market().await;
    let recorded = RecordingNotifier::new();
    let orchestrator = SettlementOrchestrator::new(Arc::new(m.store.clone()), SettlementPolicy::default())
        .with_notifier(Arc::new(SlowNotifier {
            inner: recorded.clone(),
            delay: std::time::Duration::from_millis(500),
        }));

    let started = std::time::Instant::now();
    let request = checkout(&[(m.tomatoes.id, 1), (m.kale.id, 1)], PaymentMethod::Card);
    let receipt = orchestrator.create_order(&m.buyer, request).await.unwrap();

    assert!(started.elapsed() < std::time::Duration::from_millis(250));
    assert!(recorded.events().is_empty());
    assert_eq!(m.store.order(receipt.order.id).await.unwrap().status, OrderStatus::PendingPayment);

    orchestrator.flush_events().await;
    assert!(matches!(recorded.events().first(), Some(SettlementEvent::OrderPlaced { escrow_count: 2, .. })));
}
