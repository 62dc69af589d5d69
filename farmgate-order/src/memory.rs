use crate::models::{Escrow, EscrowStatus, Order};
use crate::repository::{SettlementStore, UnitOfWork};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use farmgate_catalog::{InventoryError, Product, StockBook};
use farmgate_core::{StoreError, StoreResult, User};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Failures to inject on purpose, keyed by record id
#[derive(Debug, Clone, Default)]
struct Faults {
    escrow_updates: HashSet<Uuid>,
    stock_decrements: HashSet<Uuid>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    catalog: StockBook,
    orders: HashMap<Uuid, Order>,
    escrows: Vec<Escrow>,
    faults: Faults,
}

/// Process-local settlement store.
///
/// A unit of work holds the store lock for its whole life and works on a
/// copy of the state, so units of work are fully serialized and a rollback
/// is simply dropping the copy.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id, user);
    }

    pub async fn add_product(&self, product: Product) {
        self.state.lock().await.catalog.upsert(product);
    }

    pub async fn order(&self, order_id: Uuid) -> Option<Order> {
        self.state.lock().await.orders.get(&order_id).cloned()
    }

    pub async fn escrow(&self, escrow_id: Uuid) -> Option<Escrow> {
        self.state.lock().await.escrows.iter().find(|e| e.id == escrow_id).cloned()
    }

    pub async fn escrows_for(&self, order_id: Uuid) -> Vec<Escrow> {
        self.state.lock().await.escrows.iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect()
    }

    pub async fn stock(&self, product_id: Uuid) -> Option<i32> {
        self.state.lock().await.catalog.available(&product_id)
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    pub async fn escrow_count(&self) -> usize {
        self.state.lock().await.escrows.len()
    }

    /// Make every later write of this escrow fail
    pub async fn fail_escrow_updates(&self, escrow_id: Uuid) {
        self.state.lock().await.faults.escrow_updates.insert(escrow_id);
    }

    /// Make every later stock decrement of this product fail
    pub async fn fail_stock_decrements(&self, product_id: Uuid) {
        self.state.lock().await.faults.stock_decrements.insert(product_id);
    }
}

#[async_trait]
impl SettlementStore for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl MemoryUnitOfWork {
    fn escrow_mut(&mut self, escrow_id: Uuid) -> StoreResult<&mut Escrow> {
        self.working.escrows.iter_mut()
            .find(|e| e.id == escrow_id)
            .ok_or_else(|| StoreError::Missing(format!("escrow {}", escrow_id)))
    }
}

fn inventory_error(product_id: Uuid, err: InventoryError) -> StoreError {
    match err {
        InventoryError::InsufficientStock { requested, available } => {
            StoreError::InsufficientStock { product_id, requested, available }
        }
        InventoryError::NotFound(id) => StoreError::Missing(format!("product {}", id)),
        other => StoreError::Backend(other.to_string()),
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn find_user(&mut self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.working.users.get(&id).cloned())
    }

    async fn find_product(&mut self, id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.working.catalog.get(&id).cloned())
    }

    async fn decrement_stock(&mut self, product_id: Uuid, quantity: i32) -> StoreResult<i32> {
        if self.working.faults.stock_decrements.contains(&product_id) {
            return Err(StoreError::Backend(format!("injected stock failure for {}", product_id)));
        }
        self.working.catalog
            .decrement(&product_id, quantity)
            .map_err(|e| inventory_error(product_id, e))
    }

    async fn restore_stock(&mut self, product_id: Uuid, quantity: i32) -> StoreResult<i32> {
        self.working.catalog
            .restore(&product_id, quantity)
            .map_err(|e| inventory_error(product_id, e))
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        if self.working.orders.contains_key(&order.id) {
            return Err(StoreError::Backend(format!("duplicate order {}", order.id)));
        }
        self.working.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_order(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        let slot = self.working.orders.get_mut(&order.id)
            .ok_or_else(|| StoreError::Missing(format!("order {}", order.id)))?;
        *slot = order.clone();
        Ok(())
    }

    async fn insert_escrow(&mut self, escrow: &Escrow) -> StoreResult<()> {
        if self.working.escrows.iter().any(|e| e.id == escrow.id) {
            return Err(StoreError::Backend(format!("duplicate escrow {}", escrow.id)));
        }
        self.working.escrows.push(escrow.clone());
        Ok(())
    }

    async fn find_escrow(&mut self, id: Uuid) -> StoreResult<Option<Escrow>> {
        Ok(self.working.escrows.iter().find(|e| e.id == id).cloned())
    }

    async fn escrows_for_order(&mut self, order_id: Uuid) -> StoreResult<Vec<Escrow>> {
        Ok(self.working.escrows.iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn update_escrow(&mut self, escrow: &Escrow) -> StoreResult<()> {
        if self.working.faults.escrow_updates.contains(&escrow.id) {
            return Err(StoreError::Backend(format!("injected write failure for escrow {}", escrow.id)));
        }
        let slot = self.escrow_mut(escrow.id)?;
        *slot = escrow.clone();
        Ok(())
    }

    async fn escrows_due_for_release(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<Escrow>> {
        let mut due: Vec<Escrow> = self.working.escrows.iter()
            .filter(|e| e.status == EscrowStatus::PendingConfirmation && e.is_due_for_auto_release(now))
            .cloned()
            .collect();
        due.sort_by_key(|e| e.confirmation_deadline);
        Ok(due)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmgate_catalog::ProductCategory;

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = InMemoryStore::new();
        let product = Product::new(Uuid::new_v4(), "Sorghum".into(), ProductCategory::Grains, "bag".into(), 900, 10);
        let product_id = product.id;
        store.add_product(product).await;

        let mut uow = store.begin().await.unwrap();
        assert_eq!(uow.decrement_stock(product_id, 4).await.unwrap(), 6);
        uow.rollback().await.unwrap();
        assert_eq!(store.stock(product_id).await, Some(10));

        let mut uow = store.begin().await.unwrap();
        uow.decrement_stock(product_id, 4).await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.stock(product_id).await, Some(6));
    }

    #[tokio::test]
    async fn test_stock_never_goes_negative() {
        let store = InMemoryStore::new();
        let product = Product::new(Uuid::new_v4(), "Milk".into(), ProductCategory::Dairy, "litre".into(), 60, 2);
        let product_id = product.id;
        store.add_product(product).await;

        let mut uow = store.begin().await.unwrap();
        let err = uow.decrement_stock(product_id, 3).await.unwrap_err();
        assert_eq!(err, StoreError::InsufficientStock { product_id, requested: 3, available: 2 });
    }

    #[tokio::test]
    async fn test_units_of_work_are_serialized() {
        let store = InMemoryStore::new();
        let wait = std::time::Duration::from_millis(50);

        let held = store.begin().await.unwrap();
        assert!(tokio::time::timeout(wait, store.begin()).await.is_err());

        held.rollback().await.unwrap();
        assert!(tokio::time::timeout(wait, store.begin()).await.is_ok());
    }

    #[tokio::test]
    async fn test_due_escrows_are_filtered_by_deadline() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut due = Escrow::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), 100, "KES", now);
        due.status = EscrowStatus::PendingConfirmation;
        due.confirmation_deadline = Some(now - chrono::Duration::minutes(1));
        let mut later = due.clone();
        later.id = Uuid::new_v4();
        later.confirmation_deadline = Some(now + chrono::Duration::days(1));

        let mut uow = store.begin().await.unwrap();
        uow.insert_escrow(&due).await.unwrap();
        uow.insert_escrow(&later).await.unwrap();
        let found = uow.escrows_due_for_release(now).await.unwrap();
        assert_eq!(found.iter().map(|e| e.id).collect::<Vec<_>>(), vec![due.id]);
    }
}
