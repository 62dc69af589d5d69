pub mod app_config;
pub mod database;
pub mod events;
pub mod settlement_repo;

pub use app_config::Config;
pub use database::DbClient;
pub use events::{EventProducer, KafkaNotifier};
pub use settlement_repo::PgSettlementStore;
