use shared::{Booking, BookingFilter, Event, Page};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ReservationError;
use crate::lock::{LockCoordinator, LockKey, LockOptions};
use crate::metrics::BookingMetrics;
use crate::request::{BookingRequest, PublishEventRequest};
use crate::store::InventoryStore;
use crate::transaction::ReservationTransaction;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct ReservationOutcome {
    pub booking: Booking,
    pub lock_acquisition_time: Duration,
}

/// Entry point for every booking operation: validation, the per-section
/// lock, the reservation transaction and the metrics around them.
pub struct BookingHandler<S: InventoryStore> {
    locks: LockCoordinator,
    transaction: ReservationTransaction<S>,
    metrics: Arc<BookingMetrics>,
    lock_options: LockOptions,
}

impl<S: InventoryStore> BookingHandler<S> {
    pub fn new(
        locks: LockCoordinator,
        store: Arc<S>,
        metrics: Arc<BookingMetrics>,
        lock_options: LockOptions,
    ) -> Self {
        Self {
            locks,
            transaction: ReservationTransaction::new(store),
            metrics,
            lock_options,
        }
    }

    pub fn metrics(&self) -> &Arc<BookingMetrics> {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<S> {
        self.transaction.store()
    }

    /// Reserves `qty` seats while holding the section lock.
    ///
    /// Any error from the transaction is returned as is, after the lock has
    /// been released. A `LockTimeout` is never retried here.
    pub async fn reserve(
        &self,
        event_id: Uuid,
        section_id: Uuid,
        qty: i32,
        user_id: &str,
        options: &LockOptions,
    ) -> Result<ReservationOutcome, ReservationError> {
        let key = LockKey::for_section(event_id, section_id);
        let transaction = &self.transaction;

        self.locks
            .with_lock(&key, options, move |handle| async move {
                let booking = transaction
                    .execute(event_id, section_id, qty, user_id, Some(&handle.token))
                    .await?;
                Ok(ReservationOutcome {
                    booking,
                    lock_acquisition_time: handle.acquisition_time,
                })
            })
            .await
    }

    pub async fn create_reservation(
        &self,
        request: &BookingRequest,
    ) -> Result<ReservationOutcome, ReservationError> {
        let booking = match request.validate() {
            Ok(booking) => booking,
            Err(e) => {
                self.metrics.record_rejected();
                warn!("Booking rejected: {}", e);
                return Err(e);
            }
        };

        self.metrics.record_attempt();
        match self
            .reserve(
                booking.event_id,
                booking.section_id,
                booking.qty,
                &booking.user_id,
                &self.lock_options,
            )
            .await
        {
            Ok(outcome) => {
                self.metrics.record_success(outcome.lock_acquisition_time);
                info!("Booking confirmed: {}", outcome.booking.id);
                Ok(outcome)
            }
            Err(e) => {
                if matches!(e, ReservationError::LockTimeout { .. }) {
                    self.metrics.record_lock_timeout();
                }
                self.metrics.record_failure();
                error!("Booking failed: {}", e);
                Err(e)
            }
        }
    }

    pub async fn list_reservations(
        &self,
        filter: &BookingFilter,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<Page<Booking>, ReservationError> {
        let page = page.unwrap_or(1).max(1);
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        Ok(self
            .store()
            .list_reservations(filter, page, page_size)
            .await?)
    }

    pub async fn publish_event(
        &self,
        request: PublishEventRequest,
    ) -> Result<Event, ReservationError> {
        let valid = request.validate()?;
        let event = Event::publish(valid.name, valid.description, valid.sections);
        self.store().publish_event(&event).await?;
        info!("Event created: {}", event.id);
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{Coordinator, MemoryCoordinator};
    use crate::lock::Backoff;
    use crate::store::MemoryInventoryStore;
    use bigdecimal::BigDecimal;
    use shared::NewSection;

    struct Fixture {
        coordinator: Arc<MemoryCoordinator>,
        handler: BookingHandler<MemoryInventoryStore>,
    }

    fn fixture() -> Fixture {
        let coordinator = Arc::new(MemoryCoordinator::new());
        let locks = LockCoordinator::with_backoff(
            coordinator.clone(),
            Backoff {
                min: Duration::from_millis(1),
                step: Duration::from_millis(1),
                max: Duration::from_millis(5),
            },
        );
        let handler = BookingHandler::new(
            locks,
            Arc::new(MemoryInventoryStore::new()),
            Arc::new(BookingMetrics::new()),
            LockOptions {
                ttl: Duration::from_secs(5),
                max_retries: 3,
            },
        );
        Fixture {
            coordinator,
            handler,
        }
    }

    async fn publish(handler: &BookingHandler<MemoryInventoryStore>, capacity: i32) -> Event {
        handler
            .publish_event(PublishEventRequest {
                name: Some("Test Concert".into()),
                description: Some("Live".into()),
                sections: Some(vec![NewSection {
                    name: "VIP".into(),
                    price: BigDecimal::from(5000),
                    capacity,
                }]),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn confirmed_booking_releases_lock_and_counts_success() {
        let Fixture {
            coordinator,
            handler,
        } = fixture();
        let event = publish(&handler, 5).await;
        let section_id = event.sections[0].id;

        let outcome = handler
            .create_reservation(&BookingRequest::new(event.id, section_id, 2, "user-1"))
            .await
            .unwrap();
        assert_eq!(outcome.booking.qty, 2);
        assert!(outcome.booking.lock_token.is_some());

        let key = LockKey::for_section(event.id, section_id);
        assert_eq!(coordinator.get(key.as_str()).await.unwrap(), None);

        let snapshot = handler.metrics().snapshot();
        assert_eq!(snapshot.booking_attempts, 1);
        assert_eq!(snapshot.booking_successes, 1);
    }

    #[tokio::test]
    async fn held_lock_times_out_without_touching_inventory() {
        let Fixture {
            coordinator,
            handler,
        } = fixture();
        let event = publish(&handler, 5).await;
        let section_id = event.sections[0].id;
        let key = LockKey::for_section(event.id, section_id);
        coordinator
            .set_if_absent(key.as_str(), "someone-else", Duration::from_secs(30))
            .await
            .unwrap();

        let err = handler
            .create_reservation(&BookingRequest::new(event.id, section_id, 1, "user-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::LockTimeout { attempts: 3, .. }));

        let stored = handler.store().find_event(event.id).await.unwrap().unwrap();
        assert_eq!(stored.sections[0].remaining, 5);
        let snapshot = handler.metrics().snapshot();
        assert_eq!(snapshot.lock_timeouts, 1);
        assert_eq!(snapshot.booking_failures, 1);
    }

    #[tokio::test]
    async fn reserve_refuses_negative_quantity() {
        let Fixture {
            coordinator,
            handler,
        } = fixture();
        let event = publish(&handler, 5).await;
        let section_id = event.sections[0].id;

        let err = handler
            .reserve(event.id, section_id, -10, "u", &LockOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::Validation(_)));

        let stored = handler.store().find_event(event.id).await.unwrap().unwrap();
        assert_eq!(stored.sections[0].remaining, 5);
        let key = LockKey::for_section(event.id, section_id);
        assert_eq!(coordinator.get(key.as_str()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_not_attempted() {
        let Fixture { handler, .. } = fixture();
        let err = handler
            .create_reservation(&BookingRequest::new(Uuid::new_v4(), Uuid::new_v4(), 0, "u"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::Validation(_)));

        let snapshot = handler.metrics().snapshot();
        assert_eq!(snapshot.booking_attempts, 0);
        assert_eq!(snapshot.booking_rejected, 1);
    }

    #[tokio::test]
    async fn listing_defaults_and_caps_page_size() {
        let Fixture { handler, .. } = fixture();
        let event = publish(&handler, 5).await;
        handler
            .create_reservation(&BookingRequest::new(event.id, event.sections[0].id, 1, "u"))
            .await
            .unwrap();

        let page = handler
            .list_reservations(&BookingFilter::default(), None, None)
            .await
            .unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(page.total, 1);

        let page = handler
            .list_reservations(&BookingFilter::default(), Some(0), Some(1000))
            .await
            .unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, MAX_PAGE_SIZE);
    }

    #[tokio::test]
    async fn published_event_starts_full_and_live() {
        let Fixture { handler, .. } = fixture();
        let event = publish(&handler, 7).await;
        assert_eq!(event.status, shared::EventStatus::Live);
        assert_eq!(event.sections[0].remaining, 7);
        assert!(handler.store().find_event(event.id).await.unwrap().is_some());
    }
}
