//! Transactional storage for events and bookings.

mod memory;
mod postgres;

pub use self::memory::{MemoryInventoryStore, MemorySession};
pub use self::postgres::{PgInventoryStore, PgSession};

use async_trait::async_trait;
use shared::{Booking, BookingFilter, Event, Page};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    /// Reads see one consistent committed version for the whole transaction.
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteConcern {
    /// Commit returns only once a majority of replicas acknowledged it.
    Majority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    pub isolation: Isolation,
    pub write_concern: WriteConcern,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation: Isolation::Snapshot,
            write_concern: WriteConcern::Majority,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Committed,
    Aborted,
}

#[async_trait]
pub trait InventoryStore: Send + Sync + 'static {
    type Session: Send;

    async fn begin_transaction(
        &self,
        options: TransactionOptions,
    ) -> Result<Self::Session, StoreError>;

    async fn read_resource(
        &self,
        id: Uuid,
        session: &mut Self::Session,
    ) -> Result<Option<Event>, StoreError>;

    async fn write_resource(
        &self,
        event: &Event,
        session: &mut Self::Session,
    ) -> Result<(), StoreError>;

    async fn write_reservation(
        &self,
        booking: &Booking,
        session: &mut Self::Session,
    ) -> Result<(), StoreError>;

    async fn commit(&self, session: &mut Self::Session) -> Result<(), StoreError>;

    async fn abort(&self, session: &mut Self::Session) -> Result<(), StoreError>;

    /// Ends the session, rolling back anything not yet committed.
    async fn close(&self, session: Self::Session);

    /// Stores a newly published event outside any reservation transaction.
    async fn publish_event(&self, event: &Event) -> Result<(), StoreError>;

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError>;

    /// Bookings matching `filter`, newest first. `page` is 1-based.
    async fn list_reservations(
        &self,
        filter: &BookingFilter,
        page: u32,
        page_size: u32,
    ) -> Result<Page<Booking>, StoreError>;
}

pub(crate) fn page_offset(page: u32, page_size: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(page_size)
}
