use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use farmgate_core::{ErrorKind, SettlementError, SettlementResponse};

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    BadRequest(String),
    Settlement(SettlementError),
    Anyhow(anyhow::Error),
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::ProductUnavailable => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::InvalidTransition
        | ErrorKind::InsufficientStock
        | ErrorKind::EscrowNotReleasable
        | ErrorKind::EscrowNotRefundable
        | ErrorKind::NotConfirmable
        | ErrorKind::OrderNotCancellable => StatusCode::CONFLICT,
        ErrorKind::TransactionAborted => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Settlement(err) => {
                let status = status_for(err.kind());
                if status.is_server_error() {
                    tracing::error!("Settlement aborted: {}", err);
                    (status, "Transaction aborted, please retry".to_string())
                } else {
                    (status, err.to_string())
                }
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        (status, Json(SettlementResponse::<()>::failed(error_message))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = match err.into().downcast::<SettlementError>() {
            Ok(settlement) => return Self::Settlement(settlement),
            Err(other) => other,
        };
        match err.downcast::<JsonRejection>() {
            Ok(rejection) => Self::BadRequest(rejection.body_text()),
            Err(other) => Self::Anyhow(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_settlement_errors_keep_their_kind() {
        let err: AppError = SettlementError::OrderNotFound(Uuid::nil()).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err: AppError = SettlementError::TransactionAborted("pool timed out".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_other_errors_are_internal() {
        let err: AppError = anyhow::anyhow!("boom").into();
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
