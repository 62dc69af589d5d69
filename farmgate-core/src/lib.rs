pub mod actor;
pub mod clock;
pub mod error;
pub mod notify;
pub mod payment;
pub mod response;

pub use actor::{Actor, Role, User};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, SettlementError, SettlementResult, StoreError, StoreResult};
pub use notify::{Notifier, RecordingNotifier, TracingNotifier};
pub use payment::{PaymentMethod, PaymentOutcome};
pub use response::SettlementResponse;
