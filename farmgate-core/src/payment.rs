use serde::{Deserialize, Serialize};

/// How the buyer settles with the marketplace
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CashOnDelivery,
    Card,
    MobileMoney,
    BankTransfer,
}

impl PaymentMethod {
    /// Prepaid methods collect funds before any vendor confirms the order.
    pub fn is_prepaid(&self) -> bool {
        !matches!(self, PaymentMethod::CashOnDelivery)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CashOnDelivery => "cash_on_delivery",
            PaymentMethod::Card => "card",
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::BankTransfer => "bank_transfer",
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash_on_delivery" => Ok(PaymentMethod::CashOnDelivery),
            "card" => Ok(PaymentMethod::Card),
            "mobile_money" => Ok(PaymentMethod::MobileMoney),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            other => Err(format!("unknown payment method: {}", other)),
        }
    }
}

/// Result reported by the payment gateway for an order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Paid,
    Failed,
}
