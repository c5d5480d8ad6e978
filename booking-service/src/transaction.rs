//! Read, check, decrement and insert as one store transaction.
//!
//! This is the authoritative guard against overselling. The capacity check
//! runs against the transaction's snapshot, and a concurrent committed write
//! to the same event makes the commit fail, so `remaining` cannot go
//! negative even when no lock is held.

use shared::{Booking, MAX_BOOKING_QTY, MIN_BOOKING_QTY};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::ReservationError;
use crate::lock::FencingToken;
use crate::store::{InventoryStore, TransactionOptions};

pub struct ReservationTransaction<S: InventoryStore> {
    store: Arc<S>,
}

impl<S: InventoryStore> Clone for ReservationTransaction<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: InventoryStore> ReservationTransaction<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn execute(
        &self,
        event_id: Uuid,
        section_id: Uuid,
        qty: i32,
        user_id: &str,
        lock_token: Option<&FencingToken>,
    ) -> Result<Booking, ReservationError> {
        if !(MIN_BOOKING_QTY..=MAX_BOOKING_QTY).contains(&i64::from(qty)) {
            return Err(ReservationError::Validation(format!(
                "qty must be between {MIN_BOOKING_QTY} and {MAX_BOOKING_QTY}, got {qty}"
            )));
        }

        let mut session = self
            .store
            .begin_transaction(TransactionOptions::default())
            .await?;

        let mut result = self
            .apply(&mut session, event_id, section_id, qty, user_id, lock_token)
            .await;
        if result.is_ok() {
            if let Err(e) = self.store.commit(&mut session).await {
                result = Err(e.into());
            }
        }

        if let Err(e) = &result {
            error!("Transaction aborted: {}", e);
            if let Err(abort_err) = self.store.abort(&mut session).await {
                warn!("Abort failed after {}: {}", e, abort_err);
            }
        }
        self.store.close(session).await;
        result
    }

    async fn apply(
        &self,
        session: &mut S::Session,
        event_id: Uuid,
        section_id: Uuid,
        qty: i32,
        user_id: &str,
        lock_token: Option<&FencingToken>,
    ) -> Result<Booking, ReservationError> {
        let mut event = self
            .store
            .read_resource(event_id, session)
            .await?
            .ok_or(ReservationError::ResourceNotFound(event_id))?;

        let section = event
            .section_mut(section_id)
            .ok_or(ReservationError::SectionNotFound(section_id))?;
        section.reserve(qty)?;

        let booking = Booking::confirmed(
            event_id,
            section,
            qty,
            user_id.to_string(),
            lock_token.map(|t| t.as_str().to_string()),
        );
        event.updated_at = booking.created_at;

        self.store.write_resource(&event, session).await?;
        self.store.write_reservation(&booking, session).await?;
        Ok(booking)
    }
}
