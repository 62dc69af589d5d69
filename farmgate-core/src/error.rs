use uuid::Uuid;

/// Coarse error classes, used by transports to choose a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidTransition,
    InsufficientStock,
    ProductUnavailable,
    Unauthorized,
    EscrowNotReleasable,
    EscrowNotRefundable,
    NotConfirmable,
    OrderNotCancellable,
    Validation,
    TransactionAborted,
}

/// Everything a settlement operation can report to its caller.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum SettlementError {
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Escrow not found: {0}")]
    EscrowNotFound(String),

    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: String,
        to: String,
    },

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Product unavailable: {0}")]
    ProductUnavailable(Uuid),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Escrow {escrow_id} cannot be released from status {status}")]
    EscrowNotReleasable {
        escrow_id: String,
        status: String,
    },

    #[error("Escrow {escrow_id} cannot be refunded from status {status}")]
    EscrowNotRefundable {
        escrow_id: String,
        status: String,
    },

    #[error("Escrow {escrow_id} cannot be confirmed from status {status}")]
    NotConfirmable {
        escrow_id: Uuid,
        status: String,
    },

    #[error("Order {order_id} cannot be cancelled in status {status}")]
    OrderNotCancellable {
        order_id: Uuid,
        status: String,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettlementError::OrderNotFound(_)
            | SettlementError::EscrowNotFound(_)
            | SettlementError::ProductNotFound(_)
            | SettlementError::UserNotFound(_) => ErrorKind::NotFound,
            SettlementError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            SettlementError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            SettlementError::ProductUnavailable(_) => ErrorKind::ProductUnavailable,
            SettlementError::Unauthorized(_) => ErrorKind::Unauthorized,
            SettlementError::EscrowNotReleasable { .. } => ErrorKind::EscrowNotReleasable,
            SettlementError::EscrowNotRefundable { .. } => ErrorKind::EscrowNotRefundable,
            SettlementError::NotConfirmable { .. } => ErrorKind::NotConfirmable,
            SettlementError::OrderNotCancellable { .. } => ErrorKind::OrderNotCancellable,
            SettlementError::Validation(_) => ErrorKind::Validation,
            SettlementError::TransactionAborted(_) => ErrorKind::TransactionAborted,
        }
    }
}

pub type SettlementResult<T> = Result<T, SettlementError>;

/// Failures raised by a store backend inside a unit of work.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("Record not found: {0}")]
    Missing(String),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for SettlementError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock { product_id, requested, available } => {
                SettlementError::InsufficientStock { product_id, requested, available }
            }
            other => SettlementError::TransactionAborted(other.to_string()),
        }
    }
}
