use crate::models::{Escrow, Order};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use farmgate_catalog::Product;
use farmgate_core::{StoreResult, User};
use farmgate_shared::SettlementEvent;
use uuid::Uuid;

/// Opens atomic units of work against the durable store.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;
}

/// One atomic unit of work: every write commits together or not at all.
///
/// Reads made through a unit of work see its own uncommitted writes, and any
/// record read here is protected from concurrent modification until the unit
/// of work ends.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn find_user(&mut self, id: Uuid) -> StoreResult<Option<User>>;

    async fn find_product(&mut self, id: Uuid) -> StoreResult<Option<Product>>;

    /// Take stock out; fails with `StoreError::InsufficientStock` rather than going negative.
    async fn decrement_stock(&mut self, product_id: Uuid, quantity: i32) -> StoreResult<i32>;

    async fn restore_stock(&mut self, product_id: Uuid, quantity: i32) -> StoreResult<i32>;

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()>;

    async fn find_order(&mut self, id: Uuid) -> StoreResult<Option<Order>>;

    async fn update_order(&mut self, order: &Order) -> StoreResult<()>;

    async fn insert_escrow(&mut self, escrow: &Escrow) -> StoreResult<()>;

    async fn find_escrow(&mut self, id: Uuid) -> StoreResult<Option<Escrow>>;

    /// Escrows of an order, in creation order
    async fn escrows_for_order(&mut self, order_id: Uuid) -> StoreResult<Vec<Escrow>>;

    async fn update_escrow(&mut self, escrow: &Escrow) -> StoreResult<()>;

    /// `pending_confirmation` escrows whose deadline is at or before `now`
    async fn escrows_due_for_release(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<Escrow>>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// A unit of work plus the clock reading and outgoing events that belong to it.
pub struct Tx {
    uow: Box<dyn UnitOfWork>,
    now: DateTime<Utc>,
    events: Vec<SettlementEvent>,
}

impl Tx {
    pub fn new(uow: Box<dyn UnitOfWork>, now: DateTime<Utc>) -> Self {
        Self { uow, now, events: Vec::new() }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn store(&mut self) -> &mut dyn UnitOfWork {
        self.uow.as_mut()
    }

    /// Queue an event; it is only handed out if the unit of work commits.
    pub fn emit(&mut self, event: SettlementEvent) {
        self.events.push(event);
    }

    pub async fn commit(self) -> StoreResult<Vec<SettlementEvent>> {
        self.uow.commit().await?;
        Ok(self.events)
    }

    pub async fn rollback(self) -> StoreResult<()> {
        self.uow.rollback().await
    }
}
