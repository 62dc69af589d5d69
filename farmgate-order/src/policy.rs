use chrono::Duration;

/// Buyer confirmation window after delivery, unless configured otherwise.
pub const DEFAULT_CONFIRMATION_WINDOW_HOURS: i64 = 72;

/// Marketplace-wide settlement knobs.
///
/// The confirmation window is a single value for every vendor and category;
/// making it vary per vendor or per category is a product decision that has
/// not been taken.
#[derive(Debug, Clone)]
pub struct SettlementPolicy {
    pub currency: String,
    pub confirmation_window: Duration,
}

impl SettlementPolicy {
    pub fn new(currency: &str, confirmation_window_hours: i64) -> Self {
        Self {
            currency: currency.to_string(),
            confirmation_window: Duration::hours(confirmation_window_hours),
        }
    }
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self::new("KES", DEFAULT_CONFIRMATION_WINDOW_HOURS)
    }
}
