use farmgate_order::{SettlementPolicy, DEFAULT_CONFIRMATION_WINDOW_HOURS};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

/// Without a URL the engine runs on the in-memory store.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: None, max_connections: default_max_connections() }
    }
}

fn default_max_connections() -> u32 { 5 }

/// Without brokers, settlement events are only logged.
#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: Option<String>,
    #[serde(default = "default_topic")]
    pub topic: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self { brokers: None, topic: default_topic() }
    }
}

fn default_topic() -> String { "settlement.events".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SettlementConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_window_hours")]
    pub confirmation_window_hours: i64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            confirmation_window_hours: default_window_hours(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

fn default_currency() -> String { "KES".to_string() }
fn default_window_hours() -> i64 { DEFAULT_CONFIRMATION_WINDOW_HOURS }
fn default_sweep_interval() -> u64 { 300 }

impl SettlementConfig {
    pub fn policy(&self) -> SettlementPolicy {
        SettlementPolicy::new(&self.currency, self.confirmation_window_hours)
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // FARMGATE__DATABASE__URL=... sets database.url
            .add_source(config::Environment::with_prefix("FARMGATE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
