use crate::error::SettlementResult;
use serde::{Deserialize, Serialize};

/// `{success, data | error}` envelope returned for every settlement operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettlementResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> SettlementResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(message.into()) }
    }
}

impl<T> From<SettlementResult<T>> for SettlementResponse<T> {
    fn from(result: SettlementResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::failed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SettlementError;

    #[test]
    fn test_failure_envelope_has_no_data_key() {
        let result: SettlementResult<u32> = Err(SettlementError::Unauthorized("not your order".into()));
        let response = SettlementResponse::from(result);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Unauthorized: not your order");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_success_envelope() {
        let json = serde_json::to_value(SettlementResponse::ok(7)).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "data": 7}));
    }
}
