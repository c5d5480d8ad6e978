pub mod api;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod lock;
pub mod metrics;
pub mod models;
pub mod request;
pub mod schema;
pub mod store;
pub mod transaction;

pub use error::{CoordinatorError, ErrorKind, ReservationError, StoreError};
pub use handlers::{BookingHandler, ReservationOutcome};
pub use lock::{LockCoordinator, LockHandle, LockKey, LockOptions};
pub use metrics::BookingMetrics;
pub use transaction::ReservationTransaction;
