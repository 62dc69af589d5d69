use async_trait::async_trait;
use chrono::{DateTime, Utc};
use farmgate_catalog::Product;
use farmgate_core::{StoreError, StoreResult, User};
use farmgate_order::{Escrow, Order, OrderItem, SettlementStore, UnitOfWork};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Postgres-backed settlement store. Every record a unit of work reads for
/// mutation is row-locked until the transaction ends.
#[derive(Clone)]
pub struct PgSettlementStore {
    pool: PgPool,
}

impl PgSettlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettlementStore for PgSettlementStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.map_err(backend)?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{}: {}", what, detail))
}

// Row structs for runtime-checked queries
#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    display_name: String,
    role: String,
    is_active: bool,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            display_name: row.display_name,
            role: row.role.parse().map_err(|e| corrupt("users.role", e))?,
            is_active: row.is_active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    vendor_id: Uuid,
    name: String,
    category: String,
    unit: String,
    unit_price: i64,
    stock_quantity: i32,
    is_active: bool,
    metadata: Option<Value>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product {
            id: row.id,
            vendor_id: row.vendor_id,
            name: row.name,
            category: row.category.parse().map_err(|e| corrupt("products.category", e))?,
            unit: row.unit,
            unit_price: row.unit_price,
            stock_quantity: row.stock_quantity,
            is_active: row.is_active,
            metadata: row.metadata.unwrap_or_else(|| serde_json::json!({})),
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    buyer_id: Uuid,
    total_amount: i64,
    currency: String,
    shipping_address: Value,
    payment_method: String,
    notes: Option<String>,
    status: String,
    cancellation_reason: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    stock_restored_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    product_id: Uuid,
    vendor_id: Uuid,
    product_name: String,
    quantity: i32,
    unit_price: i64,
    subtotal: i64,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        OrderItem {
            id: row.id,
            product_id: row.product_id,
            vendor_id: row.vendor_id,
            product_name: row.product_name,
            quantity: row.quantity,
            unit_price: row.unit_price,
            subtotal: row.subtotal,
        }
    }
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItemRow>) -> StoreResult<Order> {
        Ok(Order {
            id: self.id,
            order_number: self.order_number,
            buyer_id: self.buyer_id,
            items: items.into_iter().map(OrderItem::from).collect(),
            total_amount: self.total_amount,
            currency: self.currency,
            shipping_address: serde_json::from_value(self.shipping_address)
                .map_err(|e| corrupt("orders.shipping_address", e))?,
            payment_method: self.payment_method.parse().map_err(|e| corrupt("orders.payment_method", e))?,
            notes: self.notes,
            status: self.status.parse().map_err(|e| corrupt("orders.status", e))?,
            cancellation_reason: self.cancellation_reason,
            paid_at: self.paid_at,
            stock_restored_at: self.stock_restored_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            cancelled_at: self.cancelled_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EscrowRow {
    id: Uuid,
    order_id: Uuid,
    vendor_id: Uuid,
    buyer_id: Uuid,
    amount: i64,
    currency: String,
    status: String,
    funded_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    confirmation_deadline: Option<DateTime<Utc>>,
    buyer_confirmed_at: Option<DateTime<Utc>>,
    released_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    disputed_at: Option<DateTime<Utc>>,
    release_reason: Option<String>,
    refund_reason: Option<String>,
    dispute_reason: Option<String>,
    admin_notes: Option<String>,
    admin_override: bool,
    resolved_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EscrowRow> for Escrow {
    type Error = StoreError;

    fn try_from(row: EscrowRow) -> Result<Self, Self::Error> {
        let release_reason = row.release_reason
            .map(|r| r.parse().map_err(|e| corrupt("escrows.release_reason", e)))
            .transpose()?;

        Ok(Escrow {
            id: row.id,
            order_id: row.order_id,
            vendor_id: row.vendor_id,
            buyer_id: row.buyer_id,
            amount: row.amount,
            currency: row.currency,
            status: row.status.parse().map_err(|e| corrupt("escrows.status", e))?,
            funded_at: row.funded_at,
            delivered_at: row.delivered_at,
            confirmation_deadline: row.confirmation_deadline,
            buyer_confirmed_at: row.buyer_confirmed_at,
            released_at: row.released_at,
            refunded_at: row.refunded_at,
            cancelled_at: row.cancelled_at,
            disputed_at: row.disputed_at,
            release_reason,
            refund_reason: row.refund_reason,
            dispute_reason: row.dispute_reason,
            admin_notes: row.admin_notes,
            admin_override: row.admin_override,
            resolved_by: row.resolved_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const ESCROW_COLUMNS: &str = "id, order_id, vendor_id, buyer_id, amount, currency, status, funded_at, \
    delivered_at, confirmation_deadline, buyer_confirmed_at, released_at, refunded_at, cancelled_at, \
    disputed_at, release_reason, refund_reason, dispute_reason, admin_notes, admin_override, resolved_by, \
    created_at, updated_at";

const ORDER_COLUMNS: &str = "id, order_number, buyer_id, total_amount, currency, shipping_address, \
    payment_method, notes, status, cancellation_reason, paid_at, stock_restored_at, created_at, updated_at, \
    cancelled_at";

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn find_user(&mut self, id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, display_name, role, is_active FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(backend)?;

        row.map(User::try_from).transpose()
    }

    async fn find_product(&mut self, id: Uuid) -> StoreResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT id, vendor_id, name, category, unit, unit_price, stock_quantity, is_active, metadata, updated_at
            FROM products
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(backend)?;

        row.map(Product::try_from).transpose()
    }

    async fn decrement_stock(&mut self, product_id: Uuid, quantity: i32) -> StoreResult<i32> {
        let left: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity - $2, updated_at = NOW()
            WHERE id = $1 AND stock_quantity >= $2
            RETURNING stock_quantity
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(backend)?;

        if let Some(left) = left {
            return Ok(left);
        }

        let available: Option<i32> = sqlx::query_scalar("SELECT stock_quantity FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?;

        match available {
            Some(available) => Err(StoreError::InsufficientStock { product_id, requested: quantity, available }),
            None => Err(StoreError::Missing(format!("product {}", product_id))),
        }
    }

    async fn restore_stock(&mut self, product_id: Uuid, quantity: i32) -> StoreResult<i32> {
        sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING stock_quantity
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(backend)?
        .ok_or_else(|| StoreError::Missing(format!("product {}", product_id)))
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        let address = serde_json::to_value(&order.shipping_address)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, buyer_id, total_amount, currency, shipping_address,
                                payment_method, notes, status, cancellation_reason, paid_at, stock_restored_at,
                                created_at, updated_at, cancelled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.buyer_id)
        .bind(order.total_amount)
        .bind(&order.currency)
        .bind(address)
        .bind(order.payment_method.as_str())
        .bind(&order.notes)
        .bind(order.status.as_str())
        .bind(&order.cancellation_reason)
        .bind(order.paid_at)
        .bind(order.stock_restored_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.cancelled_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, position, product_id, vendor_id, product_name,
                                         quantity, unit_price, subtotal)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(item.id)
            .bind(order.id)
            .bind(position as i32)
            .bind(item.product_id)
            .bind(item.vendor_id)
            .bind(&item.product_name)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.subtotal)
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;
        }

        Ok(())
    }

    async fn find_order(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = $1 FOR UPDATE",
            ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, OrderItemRow>(
            r#"
            SELECT id, product_id, vendor_id, product_name, quantity, unit_price, subtotal
            FROM order_items
            WHERE order_id = $1
            ORDER BY position
            "#,
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(backend)?;

        row.into_order(items).map(Some)
    }

    async fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, cancellation_reason = $3, paid_at = $4, stock_restored_at = $5,
                updated_at = $6, cancelled_at = $7
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(&order.cancellation_reason)
        .bind(order.paid_at)
        .bind(order.stock_restored_at)
        .bind(order.updated_at)
        .bind(order.cancelled_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("order {}", order.id)));
        }
        Ok(())
    }

    async fn insert_escrow(&mut self, escrow: &Escrow) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO escrows ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, \
             $15, $16, $17, $18, $19, $20, $21, $22, $23)",
            ESCROW_COLUMNS
        ))
        .bind(escrow.id)
        .bind(escrow.order_id)
        .bind(escrow.vendor_id)
        .bind(escrow.buyer_id)
        .bind(escrow.amount)
        .bind(&escrow.currency)
        .bind(escrow.status.as_str())
        .bind(escrow.funded_at)
        .bind(escrow.delivered_at)
        .bind(escrow.confirmation_deadline)
        .bind(escrow.buyer_confirmed_at)
        .bind(escrow.released_at)
        .bind(escrow.refunded_at)
        .bind(escrow.cancelled_at)
        .bind(escrow.disputed_at)
        .bind(escrow.release_reason.map(|r| r.as_str()))
        .bind(&escrow.refund_reason)
        .bind(&escrow.dispute_reason)
        .bind(&escrow.admin_notes)
        .bind(escrow.admin_override)
        .bind(escrow.resolved_by)
        .bind(escrow.created_at)
        .bind(escrow.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn find_escrow(&mut self, id: Uuid) -> StoreResult<Option<Escrow>> {
        let row = sqlx::query_as::<_, EscrowRow>(&format!(
            "SELECT {} FROM escrows WHERE id = $1 FOR UPDATE",
            ESCROW_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(backend)?;

        row.map(Escrow::try_from).transpose()
    }

    async fn escrows_for_order(&mut self, order_id: Uuid) -> StoreResult<Vec<Escrow>> {
        let rows = sqlx::query_as::<_, EscrowRow>(&format!(
            "SELECT {} FROM escrows WHERE order_id = $1 ORDER BY seq FOR UPDATE",
            ESCROW_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(backend)?;

        rows.into_iter().map(Escrow::try_from).collect()
    }

    async fn update_escrow(&mut self, escrow: &Escrow) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE escrows
            SET status = $2, funded_at = $3, delivered_at = $4, confirmation_deadline = $5,
                buyer_confirmed_at = $6, released_at = $7, refunded_at = $8, cancelled_at = $9,
                disputed_at = $10, release_reason = $11, refund_reason = $12, dispute_reason = $13,
                admin_notes = $14, admin_override = $15, resolved_by = $16, updated_at = $17
            WHERE id = $1
            "#,
        )
        .bind(escrow.id)
        .bind(escrow.status.as_str())
        .bind(escrow.funded_at)
        .bind(escrow.delivered_at)
        .bind(escrow.confirmation_deadline)
        .bind(escrow.buyer_confirmed_at)
        .bind(escrow.released_at)
        .bind(escrow.refunded_at)
        .bind(escrow.cancelled_at)
        .bind(escrow.disputed_at)
        .bind(escrow.release_reason.map(|r| r.as_str()))
        .bind(&escrow.refund_reason)
        .bind(&escrow.dispute_reason)
        .bind(&escrow.admin_notes)
        .bind(escrow.admin_override)
        .bind(escrow.resolved_by)
        .bind(escrow.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("escrow {}", escrow.id)));
        }
        Ok(())
    }

    async fn escrows_due_for_release(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<Escrow>> {
        let rows = sqlx::query_as::<_, EscrowRow>(&format!(
            "SELECT {} FROM escrows \
             WHERE status = 'pending_confirmation' AND confirmation_deadline <= $1 \
             ORDER BY confirmation_deadline",
            ESCROW_COLUMNS
        ))
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(backend)?;

        rows.into_iter().map(Escrow::try_from).collect()
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(backend)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await.map_err(backend)
    }
}
