pub mod escrow;
pub mod manager;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod repository;
pub mod sweep;

pub use escrow::{EscrowLifecycleManager, ManualResolution};
pub use manager::OrderLifecycleManager;
pub use memory::InMemoryStore;
pub use models::{
    CheckoutItem, CheckoutRequest, Escrow, EscrowStatus, Order, OrderItem, OrderStatus, ReleaseReason,
    ShippingAddress,
};
pub use orchestrator::{EscrowStatusView, OrderReceipt, SettlementOrchestrator};
pub use policy::{SettlementPolicy, DEFAULT_CONFIRMATION_WINDOW_HOURS};
pub use repository::{SettlementStore, Tx, UnitOfWork};
pub use sweep::SweepOutcome;
