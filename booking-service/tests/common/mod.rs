#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use booking_service::coordinator::{Coordinator, MemoryCoordinator};
use booking_service::lock::Backoff;
use booking_service::request::PublishEventRequest;
use booking_service::store::{InventoryStore, MemoryInventoryStore, MemorySession, TransactionOptions};
use booking_service::{BookingHandler, BookingMetrics, CoordinatorError, LockCoordinator, LockOptions, StoreError};
use shared::{Booking, BookingFilter, Event, NewSection, Page};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Memory coordinator that counts every call made to it.
#[derive(Default)]
pub struct CountingCoordinator {
    pub inner: MemoryCoordinator,
    pub calls: AtomicUsize,
}

impl CountingCoordinator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Coordinator for CountingCoordinator {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CoordinatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, CoordinatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.compare_and_delete(key, expected).await
    }

    async fn ping(&self) -> Result<(), CoordinatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.ping().await
    }
}

/// Memory store that tracks open transactions and can inject failures.
#[derive(Default)]
pub struct InstrumentedStore {
    pub inner: MemoryInventoryStore,
    pub begins: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub fail_reservation_writes: bool,
    pub read_delay: Option<Duration>,
    pub write_delay: Option<Duration>,
}

impl InstrumentedStore {
    pub fn failing_reservation_writes() -> Self {
        Self {
            fail_reservation_writes: true,
            ..Default::default()
        }
    }

    pub fn slow_reads(delay: Duration) -> Self {
        Self {
            read_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn slow_writes(delay: Duration) -> Self {
        Self {
            write_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InventoryStore for InstrumentedStore {
    type Session = MemorySession;

    async fn begin_transaction(&self, options: TransactionOptions) -> Result<MemorySession, StoreError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.inner.begin_transaction(options).await
    }

    async fn read_resource(&self, id: Uuid, session: &mut MemorySession) -> Result<Option<Event>, StoreError> {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.read_resource(id, session).await
    }

    async fn write_resource(&self, event: &Event, session: &mut MemorySession) -> Result<(), StoreError> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.write_resource(event, session).await
    }

    async fn write_reservation(&self, booking: &Booking, session: &mut MemorySession) -> Result<(), StoreError> {
        if self.fail_reservation_writes {
            return Err(StoreError::Backend("injected write failure".into()));
        }
        self.inner.write_reservation(booking, session).await
    }

    async fn commit(&self, session: &mut MemorySession) -> Result<(), StoreError> {
        self.inner.commit(session).await
    }

    async fn abort(&self, session: &mut MemorySession) -> Result<(), StoreError> {
        self.inner.abort(session).await
    }

    async fn close(&self, session: MemorySession) {
        self.inner.close(session).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    async fn publish_event(&self, event: &Event) -> Result<(), StoreError> {
        self.inner.publish_event(event).await
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        self.inner.find_event(id).await
    }

    async fn list_reservations(
        &self,
        filter: &BookingFilter,
        page: u32,
        page_size: u32,
    ) -> Result<Page<Booking>, StoreError> {
        self.inner.list_reservations(filter, page, page_size).await
    }
}

pub fn fast_backoff() -> Backoff {
    Backoff {
        min: Duration::from_millis(1),
        step: Duration::from_millis(2),
        max: Duration::from_millis(10),
    }
}

pub fn handler<S: InventoryStore>(
    store: S,
    coordinator: Arc<dyn Coordinator>,
) -> BookingHandler<S> {
    BookingHandler::new(
        LockCoordinator::with_backoff(coordinator, fast_backoff()),
        Arc::new(store),
        Arc::new(BookingMetrics::new()),
        LockOptions {
            ttl: Duration::from_secs(5),
            max_retries: 200,
        },
    )
}

pub fn concert(sections: &[(&str, i64, i32)]) -> PublishEventRequest {
    PublishEventRequest {
        name: Some("Test Concert".into()),
        description: Some("Capacity test".into()),
        sections: Some(
            sections
                .iter()
                .map(|(name, price, capacity)| NewSection {
                    name: name.to_string(),
                    price: BigDecimal::from(*price),
                    capacity: *capacity,
                })
                .collect(),
        ),
    }
}

pub async fn remaining<S: InventoryStore>(handler: &BookingHandler<S>, event: &Event, section: usize) -> i32 {
    handler
        .store()
        .find_event(event.id)
        .await
        .unwrap()
        .unwrap()
        .sections[section]
        .remaining
}
