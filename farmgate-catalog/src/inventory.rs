use crate::product::Product;
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

/// In-memory catalog with stock tracking.
///
/// Quantities never go negative: a decrement larger than what is on hand is
/// rejected without touching the count.
#[derive(Debug, Clone, Default)]
pub struct StockBook {
    products: HashMap<Uuid, Product>,
}

impl StockBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a listing
    pub fn upsert(&mut self, product: Product) {
        self.products.insert(product.id, product);
    }

    pub fn get(&self, product_id: &Uuid) -> Option<&Product> {
        self.products.get(product_id)
    }

    pub fn available(&self, product_id: &Uuid) -> Option<i32> {
        self.products.get(product_id).map(|p| p.stock_quantity)
    }

    /// Take `quantity` units out of stock, returning what remains.
    pub fn decrement(&mut self, product_id: &Uuid, quantity: i32) -> Result<i32, InventoryError> {
        if quantity <= 0 {
            return Err(InventoryError::InvalidQuantity(quantity));
        }

        let product = self.products.get_mut(product_id)
            .ok_or_else(|| InventoryError::NotFound(product_id.to_string()))?;

        if product.stock_quantity < quantity {
            return Err(InventoryError::InsufficientStock {
                requested: quantity,
                available: product.stock_quantity,
            });
        }

        product.stock_quantity -= quantity;
        product.updated_at = Utc::now();
        Ok(product.stock_quantity)
    }

    /// Put `quantity` units back (order cancelled or refunded).
    pub fn restore(&mut self, product_id: &Uuid, quantity: i32) -> Result<i32, InventoryError> {
        if quantity <= 0 {
            return Err(InventoryError::InvalidQuantity(quantity));
        }

        let product = self.products.get_mut(product_id)
            .ok_or_else(|| InventoryError::NotFound(product_id.to_string()))?;

        product.stock_quantity = product.stock_quantity
            .checked_add(quantity)
            .ok_or(InventoryError::InvalidQuantity(quantity))?;
        product.updated_at = Utc::now();
        Ok(product.stock_quantity)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InventoryError {
    #[error("Inventory not found: {0}")]
    NotFound(String),

    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        requested: i32,
        available: i32,
    },

    #[error("Invalid stock quantity: {0}")]
    InvalidQuantity(i32),
}
