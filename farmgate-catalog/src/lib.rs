pub mod product;
pub mod inventory;

pub use product::{Product, ProductCategory, ProductError};
pub use inventory::{InventoryError, StockBook};
