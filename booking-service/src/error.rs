//! Error types for the booking core

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Failures talking to the lock coordinator keyspace.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("coordinator unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by an inventory store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A concurrent committed write invalidated this transaction's snapshot.
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store error: {0}")]
    Backend(String),
}

/// Everything a reservation request can be rejected with.
#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("lock acquisition timeout for {key} after {attempts} attempts")]
    LockTimeout { key: String, attempts: u32 },
    #[error("event not found: {0}")]
    ResourceNotFound(Uuid),
    #[error("section not found: {0}")]
    SectionNotFound(Uuid),
    #[error("only {remaining} seats available, {requested} requested")]
    InsufficientCapacity { requested: i32, remaining: i32 },
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),
    #[error("lock coordinator unavailable: {0}")]
    CoordinatorUnavailable(String),
    #[error("inventory store unavailable: {0}")]
    StoreUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    LockTimeout,
    ResourceNotFound,
    SectionNotFound,
    InsufficientCapacity,
    ValidationError,
    TransactionAborted,
    CoordinatorUnavailable,
    StoreUnavailable,
}

impl ReservationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReservationError::LockTimeout { .. } => ErrorKind::LockTimeout,
            ReservationError::ResourceNotFound(_) => ErrorKind::ResourceNotFound,
            ReservationError::SectionNotFound(_) => ErrorKind::SectionNotFound,
            ReservationError::InsufficientCapacity { .. } => ErrorKind::InsufficientCapacity,
            ReservationError::Validation(_) => ErrorKind::ValidationError,
            ReservationError::TransactionAborted(_) => ErrorKind::TransactionAborted,
            ReservationError::CoordinatorUnavailable(_) => ErrorKind::CoordinatorUnavailable,
            ReservationError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
        }
    }

    /// Whether the same request may succeed if sent again later.
    ///
    /// Aborted transactions count as retryable: the conflict came from a
    /// concurrent writer, not from the request itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::LockTimeout
                | ErrorKind::TransactionAborted
                | ErrorKind::CoordinatorUnavailable
                | ErrorKind::StoreUnavailable
        )
    }
}

impl From<StoreError> for ReservationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) | StoreError::Backend(msg) => {
                ReservationError::TransactionAborted(msg)
            }
            StoreError::Unavailable(msg) => ReservationError::StoreUnavailable(msg),
        }
    }
}

impl From<CoordinatorError> for ReservationError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::Unavailable(msg) => ReservationError::CoordinatorUnavailable(msg),
        }
    }
}

impl From<shared::InsufficientCapacity> for ReservationError {
    fn from(err: shared::InsufficientCapacity) -> Self {
        ReservationError::InsufficientCapacity {
            requested: err.requested,
            remaining: err.remaining,
        }
    }
}

impl From<shared::ReserveError> for ReservationError {
    fn from(err: shared::ReserveError) -> Self {
        match err {
            shared::ReserveError::InvalidQuantity(_) => ReservationError::Validation(err.to_string()),
            shared::ReserveError::Insufficient(capacity) => capacity.into(),
        }
    }
}

impl From<redis::RedisError> for CoordinatorError {
    fn from(err: redis::RedisError) -> Self {
        CoordinatorError::Unavailable(err.to_string())
    }
}
