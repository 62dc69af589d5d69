pub mod models;
pub mod pii;

pub use models::events::SettlementEvent;
pub use pii::Masked;
