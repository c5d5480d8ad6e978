//! In-process store with snapshot reads and commit-time validation.
//!
//! Each section carries a version that is bumped on every committed change
//! to it. A session remembers the versions it read, and commit fails with a
//! conflict only if a section it changed was committed by someone else in
//! the meantime (first committer wins). Sessions that change different
//! sections of the same event both commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{Booking, BookingFilter, Event, Page, Section};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{page_offset, InventoryStore, SessionState, TransactionOptions};
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    events: HashMap<Uuid, Versioned>,
    bookings: Vec<Booking>,
}

#[derive(Clone)]
struct Versioned {
    event: Event,
    section_versions: HashMap<Uuid, u64>,
}

impl Versioned {
    fn published(event: &Event) -> Self {
        Self {
            event: event.clone(),
            section_versions: event.sections.iter().map(|s| (s.id, 0)).collect(),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryInventoryStore {
    inner: Arc<Mutex<Inner>>,
    next_session: Arc<AtomicU64>,
}

pub struct MemorySession {
    id: u64,
    state: SessionState,
    snapshot: HashMap<Uuid, Option<Versioned>>,
    event_writes: HashMap<Uuid, Event>,
    booking_writes: Vec<Booking>,
}

/// Sections of one event that a session changed, ready to apply.
struct SectionChanges {
    event_id: Uuid,
    sections: Vec<Section>,
    updated_at: DateTime<Utc>,
}

impl MemorySession {
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.state != SessionState::Open {
            return Err(StoreError::Backend(format!(
                "session {} is {:?}",
                self.id, self.state
            )));
        }
        Ok(())
    }

    fn discard(&mut self) {
        self.event_writes.clear();
        self.booking_writes.clear();
    }

    /// Checks every changed section against the committed versions.
    fn validate(&self, inner: &Inner) -> Result<Vec<SectionChanges>, StoreError> {
        let mut changes = Vec::with_capacity(self.event_writes.len());
        for (id, staged) in &self.event_writes {
            let (Some(Some(base)), Some(current)) = (self.snapshot.get(id), inner.events.get(id))
            else {
                return Err(StoreError::Backend(format!("event not found: {id}")));
            };

            let mut sections = Vec::new();
            for section in &staged.sections {
                if base.event.section(section.id) == Some(section) {
                    continue;
                }
                let read = base.section_versions.get(&section.id);
                let now = current.section_versions.get(&section.id);
                if now.is_none() {
                    return Err(StoreError::Backend(format!(
                        "section not found: {}",
                        section.id
                    )));
                }
                if read != now {
                    return Err(StoreError::Conflict(format!(
                        "section {} of event {id} changed since it was read (read version {read:?}, now {now:?})",
                        section.id
                    )));
                }
                sections.push(section.clone());
            }
            changes.push(SectionChanges {
                event_id: *id,
                sections,
                updated_at: staged.updated_at,
            });
        }
        Ok(changes)
    }
}

impl MemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn committed(&self, id: Uuid) -> Option<Versioned> {
        self.inner.lock().await.events.get(&id).cloned()
    }
}

#[async_trait]
impl InventoryStore for MemoryInventoryStore {
    type Session = MemorySession;

    async fn begin_transaction(
        &self,
        options: TransactionOptions,
    ) -> Result<MemorySession, StoreError> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        debug!(session = id, ?options, "memory transaction started");
        Ok(MemorySession {
            id,
            state: SessionState::Open,
            snapshot: HashMap::new(),
            event_writes: HashMap::new(),
            booking_writes: Vec::new(),
        })
    }

    async fn read_resource(
        &self,
        id: Uuid,
        session: &mut MemorySession,
    ) -> Result<Option<Event>, StoreError> {
        session.ensure_open()?;
        if let Some(staged) = session.event_writes.get(&id) {
            return Ok(Some(staged.clone()));
        }
        if !session.snapshot.contains_key(&id) {
            let committed = self.committed(id).await;
            session.snapshot.insert(id, committed);
        }
        Ok(session
            .snapshot
            .get(&id)
            .and_then(|v| v.as_ref())
            .map(|v| v.event.clone()))
    }

    /// Stages the event's section state. Event metadata is fixed at publish
    /// time and is not written back.
    async fn write_resource(
        &self,
        event: &Event,
        session: &mut MemorySession,
    ) -> Result<(), StoreError> {
        session.ensure_open()?;
        if !session.snapshot.contains_key(&event.id) {
            let committed = self.committed(event.id).await;
            session.snapshot.insert(event.id, committed);
        }
        if !matches!(session.snapshot.get(&event.id), Some(Some(_))) {
            return Err(StoreError::Backend(format!("event not found: {}", event.id)));
        }
        session.event_writes.insert(event.id, event.clone());
        Ok(())
    }

    async fn write_reservation(
        &self,
        booking: &Booking,
        session: &mut MemorySession,
    ) -> Result<(), StoreError> {
        session.ensure_open()?;
        session.booking_writes.push(booking.clone());
        Ok(())
    }

    async fn commit(&self, session: &mut MemorySession) -> Result<(), StoreError> {
        session.ensure_open()?;
        let mut inner = self.inner.lock().await;

        let changes = session.validate(&inner)?;
        for booking in &session.booking_writes {
            if inner.bookings.iter().any(|b| b.id == booking.id) {
                return Err(StoreError::Backend(format!(
                    "duplicate booking id: {}",
                    booking.id
                )));
            }
        }

        for change in changes {
            let Some(current) = inner.events.get_mut(&change.event_id) else {
                continue;
            };
            if change.sections.is_empty() {
                continue;
            }
            for section in change.sections {
                if let Some(version) = current.section_versions.get_mut(&section.id) {
                    *version += 1;
                }
                if let Some(slot) = current.event.section_mut(section.id) {
                    *slot = section;
                }
            }
            current.event.updated_at = current.event.updated_at.max(change.updated_at);
        }
        session.event_writes.clear();
        inner.bookings.append(&mut session.booking_writes);
        session.state = SessionState::Committed;
        debug!(session = session.id, "memory transaction committed");
        Ok(())
    }

    async fn abort(&self, session: &mut MemorySession) -> Result<(), StoreError> {
        session.discard();
        if session.state == SessionState::Open {
            session.state = SessionState::Aborted;
        }
        debug!(session = session.id, "memory transaction aborted");
        Ok(())
    }

    async fn close(&self, mut session: MemorySession) {
        if session.state == SessionState::Open {
            let _ = self.abort(&mut session).await;
        }
    }

    async fn publish_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.events.contains_key(&event.id) {
            return Err(StoreError::Backend(format!(
                "event already exists: {}",
                event.id
            )));
        }
        inner.events.insert(event.id, Versioned::published(event));
        Ok(())
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.committed(id).await.map(|v| v.event))
    }

    async fn list_reservations(
        &self,
        filter: &BookingFilter,
        page: u32,
        page_size: u32,
    ) -> Result<Page<Booking>, StoreError> {
        let inner = self.inner.lock().await;
        let mut matching: Vec<&Booking> =
            inner.bookings.iter().filter(|b| filter.matches(b)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let offset = usize::try_from(page_offset(page, page_size)).unwrap_or(usize::MAX);
        let items = matching
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, page, page_size, total))
    }
}
