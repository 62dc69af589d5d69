use chrono::{DateTime, Utc};
use farmgate_core::{PaymentMethod, SettlementError, SettlementResult};
use farmgate_shared::Masked;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PendingPayment,
    Paid,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
    Refunded,
    Disputed,
    PaymentFailed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 12] = [
        OrderStatus::Pending,
        OrderStatus::PendingPayment,
        OrderStatus::Paid,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
        OrderStatus::Disputed,
        OrderStatus::PaymentFailed,
    ];

    /// The order transition table. Every status change goes through here.
    pub fn allowed_targets(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled],
            PendingPayment => &[Paid, PaymentFailed],
            Paid => &[Confirmed, Refunded],
            Confirmed => &[Processing, Cancelled],
            Processing => &[Shipped, Cancelled],
            Shipped => &[Delivered],
            Delivered => &[Completed, Refunded],
            Disputed => &[Refunded, Delivered],
            PaymentFailed => &[Cancelled],
            Completed | Cancelled | Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.allowed_targets().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// Statuses only the payment gateway (or an admin) may set
    pub fn is_payment_outcome(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::PaymentFailed)
    }

    /// Statuses from which the buyer or vendor may still call the order off
    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Disputed => "disputed",
            OrderStatus::PaymentFailed => "payment_failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown order status: {}", s))
    }
}

/// Escrow status in the fund-holding lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    Funded,
    PendingConfirmation,
    ReleasedToVendor,
    RefundedToBuyer,
    Disputed,
    Cancelled,
}

impl EscrowStatus {
    pub const ALL: [EscrowStatus; 7] = [
        EscrowStatus::Pending,
        EscrowStatus::Funded,
        EscrowStatus::PendingConfirmation,
        EscrowStatus::ReleasedToVendor,
        EscrowStatus::RefundedToBuyer,
        EscrowStatus::Disputed,
        EscrowStatus::Cancelled,
    ];

    /// The escrow transition table. Terminal statuses lead nowhere.
    pub fn allowed_targets(&self) -> &'static [EscrowStatus] {
        use EscrowStatus::*;
        match self {
            Pending => &[Funded, Cancelled],
            Funded => &[PendingConfirmation, ReleasedToVendor, RefundedToBuyer, Disputed],
            PendingConfirmation => &[ReleasedToVendor, RefundedToBuyer, Disputed],
            Disputed => &[ReleasedToVendor, RefundedToBuyer],
            ReleasedToVendor | RefundedToBuyer | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: EscrowStatus) -> bool {
        self.allowed_targets().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// Funds are held and an admin may settle them either way
    pub fn is_admin_resolvable(&self) -> bool {
        matches!(
            self,
            EscrowStatus::Funded | EscrowStatus::PendingConfirmation | EscrowStatus::Disputed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Pending => "pending",
            EscrowStatus::Funded => "funded",
            EscrowStatus::PendingConfirmation => "pending_confirmation",
            EscrowStatus::ReleasedToVendor => "released_to_vendor",
            EscrowStatus::RefundedToBuyer => "refunded_to_buyer",
            EscrowStatus::Disputed => "disputed",
            EscrowStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EscrowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EscrowStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown escrow status: {}", s))
    }
}

/// Why held funds went to the vendor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    BuyerConfirmed,
    AdminRelease,
    AutoRelease,
}

impl ReleaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::BuyerConfirmed => "buyer_confirmed",
            ReleaseReason::AdminRelease => "admin_release",
            ReleaseReason::AutoRelease => "auto_release",
        }
    }
}

impl std::str::FromStr for ReleaseReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer_confirmed" => Ok(ReleaseReason::BuyerConfirmed),
            "admin_release" => Ok(ReleaseReason::AdminRelease),
            "auto_release" => Ok(ReleaseReason::AutoRelease),
            other => Err(format!("unknown release reason: {}", other)),
        }
    }
}

/// Where the produce goes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShippingAddress {
    pub recipient: Masked<String>,
    pub phone: Masked<String>,
    pub line1: String,
    pub city: String,
    pub region: Option<String>,
    pub country: String,
}

/// One product line of a checkout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// A buyer's cart as submitted at checkout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutRequest {
    pub items: Vec<CheckoutItem>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub notes: Option<String>,
}

/// The single source of truth for a buyer's purchase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub buyer_id: Uuid,
    pub items: Vec<OrderItem>,
    pub total_amount: i64,
    pub currency: String,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    pub status: OrderStatus,
    pub cancellation_reason: Option<String>,
    /// Set once, when the gateway's payment confirmation is applied
    pub paid_at: Option<DateTime<Utc>>,
    /// Set once, when line-item stock goes back to the catalog
    pub stock_restored_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        buyer_id: Uuid,
        items: Vec<OrderItem>,
        shipping_address: ShippingAddress,
        payment_method: PaymentMethod,
        notes: Option<String>,
        currency: &str,
        now: DateTime<Utc>,
    ) -> SettlementResult<Self> {
        let id = Uuid::new_v4();
        let total_amount = checked_total(items.iter().map(|item| item.subtotal))?;
        let status = if payment_method.is_prepaid() {
            OrderStatus::PendingPayment
        } else {
            OrderStatus::Pending
        };

        Ok(Self {
            id,
            order_number: Self::generate_order_number(&id, now),
            buyer_id,
            items,
            total_amount,
            currency: currency.to_string(),
            shipping_address,
            payment_method,
            notes,
            status,
            cancellation_reason: None,
            paid_at: None,
            stock_restored_at: None,
            created_at: now,
            updated_at: now,
            cancelled_at: None,
        })
    }

    /// Format: ORD-{yyyymmdd}-{first 8 hex of id}
    fn generate_order_number(id: &Uuid, now: DateTime<Utc>) -> String {
        let short_id = &id.simple().to_string()[..8];
        format!("ORD-{}-{}", now.format("%Y%m%d"), short_id.to_uppercase())
    }

    /// Move to `next` if the transition table allows it; returns the previous status.
    pub fn transition(&mut self, next: OrderStatus, now: DateTime<Utc>) -> SettlementResult<OrderStatus> {
        if !self.status.can_transition_to(next) {
            return Err(SettlementError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let previous = self.status;
        self.status = next;
        self.updated_at = now;
        if next == OrderStatus::Cancelled {
            self.cancelled_at = Some(now);
        }
        Ok(previous)
    }

    pub fn calculate_total(&self) -> SettlementResult<i64> {
        checked_total(self.items.iter().map(|item| item.subtotal))
    }

    pub fn involves_vendor(&self, vendor_id: Uuid) -> bool {
        self.items.iter().any(|item| item.vendor_id == vendor_id)
    }

    /// Per-vendor subtotals, in the order each vendor first appears in the cart.
    pub fn vendor_totals(&self) -> SettlementResult<Vec<(Uuid, i64)>> {
        let mut totals: Vec<(Uuid, i64)> = Vec::new();
        for item in &self.items {
            match totals.iter_mut().find(|(vendor_id, _)| *vendor_id == item.vendor_id) {
                Some((_, total)) => {
                    *total = total.checked_add(item.subtotal).ok_or_else(|| {
                        SettlementError::Validation(format!("amount overflow for vendor {}", item.vendor_id))
                    })?
                }
                None => totals.push((item.vendor_id, item.subtotal)),
            }
        }
        Ok(totals)
    }
}

fn checked_total(mut amounts: impl Iterator<Item = i64>) -> SettlementResult<i64> {
    amounts
        .try_fold(0i64, |acc, amount| acc.checked_add(amount))
        .ok_or_else(|| SettlementError::Validation("order total overflows".to_string()))
}

/// An individual product line within an order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub vendor_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub subtotal: i64,
}

impl OrderItem {
    pub fn new(
        product_id: Uuid,
        vendor_id: Uuid,
        product_name: String,
        quantity: i32,
        unit_price: i64,
        subtotal: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            vendor_id,
            product_name,
            quantity,
            unit_price,
            subtotal,
        }
    }
}

/// Buyer funds held for one vendor's share of one order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Escrow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub vendor_id: Uuid,
    pub buyer_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub status: EscrowStatus,
    pub funded_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub confirmation_deadline: Option<DateTime<Utc>>,
    pub buyer_confirmed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub disputed_at: Option<DateTime<Utc>>,
    pub release_reason: Option<ReleaseReason>,
    pub refund_reason: Option<String>,
    pub dispute_reason: Option<String>,
    pub admin_notes: Option<String>,
    pub admin_override: bool,
    pub resolved_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Escrow {
    pub fn new(
        order_id: Uuid,
        vendor_id: Uuid,
        buyer_id: Uuid,
        amount: i64,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            vendor_id,
            buyer_id,
            amount,
            currency: currency.to_string(),
            status: EscrowStatus::Pending,
            funded_at: None,
            delivered_at: None,
            confirmation_deadline: None,
            buyer_confirmed_at: None,
            released_at: None,
            refunded_at: None,
            cancelled_at: None,
            disputed_at: None,
            release_reason: None,
            refund_reason: None,
            dispute_reason: None,
            admin_notes: None,
            admin_override: false,
            resolved_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next` if the escrow table allows it; returns the previous status.
    pub fn transition(&mut self, next: EscrowStatus, now: DateTime<Utc>) -> SettlementResult<EscrowStatus> {
        if !self.status.can_transition_to(next) {
            return Err(SettlementError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let previous = self.status;
        self.status = next;
        self.updated_at = now;
        match next {
            EscrowStatus::Funded => self.funded_at = Some(now),
            EscrowStatus::ReleasedToVendor => self.released_at = Some(now),
            EscrowStatus::RefundedToBuyer => self.refunded_at = Some(now),
            EscrowStatus::Cancelled => self.cancelled_at = Some(now),
            EscrowStatus::Disputed => self.disputed_at = Some(now),
            EscrowStatus::Pending | EscrowStatus::PendingConfirmation => {}
        }
        Ok(previous)
    }

    /// Past its confirmation deadline and still waiting on the buyer
    pub fn is_due_for_auto_release(&self, now: DateTime<Utc>) -> bool {
        self.status == EscrowStatus::PendingConfirmation
            && self.confirmation_deadline.is_some_and(|deadline| deadline <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn address() -> ShippingAddress {
        ShippingAddress {
            recipient: Masked::new("Wanjiru Kamau".to_string()),
            phone: Masked::new("+254700000001".to_string()),
            line1: "Plot 12, Kiambu Road".to_string(),
            city: "Kiambu".to_string(),
            region: None,
            country: "KE".to_string(),
        }
    }

    fn order_with(items: Vec<OrderItem>, method: PaymentMethod) -> Order {
        Order::new(Uuid::new_v4(), items, address(), method, None, "KES", Utc::now()).unwrap()
    }

    #[test]
    fn test_order_total_and_vendor_grouping() {
        let vendor_a = Uuid::new_v4();
        let vendor_b = Uuid::new_v4();
        let items = vec![
            OrderItem::new(Uuid::new_v4(), vendor_a, "Tomatoes".into(), 2, 30, 60),
            OrderItem::new(Uuid::new_v4(), vendor_b, "Kale".into(), 1, 50, 50),
            OrderItem::new(Uuid::new_v4(), vendor_a, "Onions".into(), 4, 10, 40),
        ];
        let order = order_with(items, PaymentMethod::Card);

        assert_eq!(order.total_amount, 150);
        assert_eq!(order.total_amount, order.calculate_total().unwrap());
        assert_eq!(order.vendor_totals().unwrap(), vec![(vendor_a, 100), (vendor_b, 50)]);
        assert!(order.order_number.starts_with("ORD-"));
    }

    #[test]
    fn test_total_overflow_is_a_validation_error() {
        let vendor = Uuid::new_v4();
        let items = vec![
            OrderItem::new(Uuid::new_v4(), vendor, "Maize".into(), 1, i64::MAX, i64::MAX),
            OrderItem::new(Uuid::new_v4(), vendor, "Beans".into(), 1, 1, 1),
        ];

        let err = Order::new(Uuid::new_v4(), items, address(), PaymentMethod::Card, None, "KES", Utc::now())
            .unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));
    }

    #[test]
    fn test_initial_status_depends_on_payment_method() {
        assert_eq!(order_with(vec![], PaymentMethod::MobileMoney).status, OrderStatus::PendingPayment);
        assert_eq!(order_with(vec![], PaymentMethod::CashOnDelivery).status, OrderStatus::Pending);
    }

    #[test]
    fn test_every_pair_outside_the_table_is_rejected() {
        let mut allowed = 0;
        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                let mut order = order_with(vec![], PaymentMethod::Card);
                order.status = from;
                let before = order.clone();

                match order.transition(to, Utc::now()) {
                    Ok(previous) => {
                        allowed += 1;
                        assert_eq!(previous, from);
                        assert_eq!(order.status, to);
                    }
                    Err(SettlementError::InvalidTransition { from: f, to: t }) => {
                        assert_eq!(f, from.as_str());
                        assert_eq!(t, to.as_str());
                        assert_eq!(order, before);
                    }
                    Err(other) => panic!("unexpected error {other:?}"),
                }
            }
        }
        assert_eq!(allowed, 16);
    }

    #[test]
    fn test_terminal_statuses() {
        let terminal: Vec<_> = OrderStatus::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![OrderStatus::Completed, OrderStatus::Cancelled, OrderStatus::Refunded]);

        let terminal: Vec<_> = EscrowStatus::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![EscrowStatus::ReleasedToVendor, EscrowStatus::RefundedToBuyer, EscrowStatus::Cancelled]
        );
    }

    #[test]
    fn test_escrow_transition_stamps_timestamps() {
        let now = Utc::now();
        let mut escrow = Escrow::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), 100, "KES", now);

        escrow.transition(EscrowStatus::Funded, now).unwrap();
        assert_eq!(escrow.funded_at, Some(now));

        escrow.transition(EscrowStatus::RefundedToBuyer, now).unwrap();
        assert_eq!(escrow.refunded_at, Some(now));

        // Frozen once terminal
        let frozen = escrow.clone();
        assert!(escrow.transition(EscrowStatus::ReleasedToVendor, now).is_err());
        assert_eq!(escrow, frozen);
    }

    #[test]
    fn test_due_for_auto_release() {
        let now = Utc::now();
        let mut escrow = Escrow::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), 100, "KES", now);
        escrow.status = EscrowStatus::PendingConfirmation;
        escrow.confirmation_deadline = Some(now + Duration::days(3));

        assert!(!escrow.is_due_for_auto_release(now));
        assert!(escrow.is_due_for_auto_release(now + Duration::days(3)));
    }

    #[test]
    fn test_status_names_parse_back() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        for status in EscrowStatus::ALL {
            assert_eq!(status.as_str().parse::<EscrowStatus>().unwrap(), status);
        }
        assert!("archived".parse::<OrderStatus>().is_err());
    }
}
