use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Produce categories listed on the marketplace
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProductCategory {
    Grains,
    Vegetables,
    Fruits,
    Dairy,
    Livestock,
    Poultry,
    Seeds,
    Fertilizer,
    Equipment,
}

impl ProductCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductCategory::Grains => "grains",
            ProductCategory::Vegetables => "vegetables",
            ProductCategory::Fruits => "fruits",
            ProductCategory::Dairy => "dairy",
            ProductCategory::Livestock => "livestock",
            ProductCategory::Poultry => "poultry",
            ProductCategory::Seeds => "seeds",
            ProductCategory::Fertilizer => "fertilizer",
            ProductCategory::Equipment => "equipment",
        }
    }
}

impl std::str::FromStr for ProductCategory {
    type Err = ProductError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grains" => Ok(ProductCategory::Grains),
            "vegetables" => Ok(ProductCategory::Vegetables),
            "fruits" => Ok(ProductCategory::Fruits),
            "dairy" => Ok(ProductCategory::Dairy),
            "livestock" => Ok(ProductCategory::Livestock),
            "poultry" => Ok(ProductCategory::Poultry),
            "seeds" => Ok(ProductCategory::Seeds),
            "fertilizer" => Ok(ProductCategory::Fertilizer),
            "equipment" => Ok(ProductCategory::Equipment),
            other => Err(ProductError::UnknownCategory(other.to_string())),
        }
    }
}

/// A vendor's listing. Prices are integer minor units of the marketplace currency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub name: String,
    pub category: ProductCategory,
    /// Sale unit shown to buyers ("kg", "crate", "bag")
    pub unit: String,
    pub unit_price: i64,
    pub stock_quantity: i32,
    pub is_active: bool,
    pub metadata: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(
        vendor_id: Uuid,
        name: String,
        category: ProductCategory,
        unit: String,
        unit_price: i64,
        stock_quantity: i32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            vendor_id,
            name,
            category,
            unit,
            unit_price,
            stock_quantity,
            is_active: true,
            metadata: serde_json::json!({}),
            updated_at: Utc::now(),
        }
    }

    /// Check the listing can take an order of `quantity` units.
    pub fn ensure_orderable(&self, quantity: i32) -> Result<(), ProductError> {
        if !self.is_active {
            return Err(ProductError::NotAvailable(self.id.to_string()));
        }
        if quantity <= 0 {
            return Err(ProductError::InvalidQuantity(quantity));
        }
        if self.stock_quantity < quantity {
            return Err(ProductError::InsufficientStock {
                product_id: self.id,
                requested: quantity,
                available: self.stock_quantity,
            });
        }
        Ok(())
    }

    /// Line subtotal for `quantity` units at the listed price
    pub fn subtotal(&self, quantity: i32) -> Result<i64, ProductError> {
        self.unit_price
            .checked_mul(i64::from(quantity))
            .ok_or(ProductError::PriceOverflow(self.id.to_string()))
    }
}

/// Product-related errors
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ProductError {
    #[error("Product not found: {0}")]
    NotFound(String),

    #[error("Product not available: {0}")]
    NotAvailable(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i32),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Price overflow for product {0}")]
    PriceOverflow(String),

    #[error("Unknown product category: {0}")]
    UnknownCategory(String),
}
