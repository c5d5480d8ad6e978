use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Smallest quantity a single booking may request.
pub const MIN_BOOKING_QTY: i64 = 1;
/// Largest quantity a single booking may request.
pub const MAX_BOOKING_QTY: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Live,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Pending,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("only {remaining} seats available, {requested} requested")]
pub struct InsufficientCapacity {
    pub requested: i32,
    pub remaining: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReserveError {
    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(i32),
    #[error(transparent)]
    Insufficient(#[from] InsufficientCapacity),
}

/// A priced, capacity-bounded sub-unit of an [`Event`].
///
/// Sections only exist inside their event and are addressed by id within it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub capacity: i32,
    pub remaining: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSection {
    pub name: String,
    pub price: BigDecimal,
    pub capacity: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub status: EventStatus,
    pub sections: Vec<Section>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub event_id: Uuid,
    pub section_id: Uuid,
    pub qty: i32,
    pub user_id: String,
    pub total_price: BigDecimal,
    pub status: BookingStatus,
    /// Fencing token of the lock held when the booking was written.
    pub lock_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingFilter {
    pub event_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub status: Option<BookingStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Draft => "draft",
            EventStatus::Live => "live",
            EventStatus::Completed => "completed",
        }
    }
}

impl FromStr for EventStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(EventStatus::Draft),
            "live" => Ok(EventStatus::Live),
            "completed" => Ok(EventStatus::Completed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Pending => "pending",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(BookingStatus::Confirmed),
            "pending" => Ok(BookingStatus::Pending),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Section {
    pub fn new(section: NewSection) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: section.name,
            price: section.price,
            capacity: section.capacity,
            remaining: section.capacity,
        }
    }

    /// Takes `qty` units out of `remaining`, refusing to go below zero.
    pub fn reserve(&mut self, qty: i32) -> Result<(), ReserveError> {
        if qty <= 0 {
            return Err(ReserveError::InvalidQuantity(qty));
        }
        if self.remaining < qty {
            return Err(InsufficientCapacity {
                requested: qty,
                remaining: self.remaining,
            }
            .into());
        }
        self.remaining -= qty;
        Ok(())
    }

    pub fn total_price(&self, qty: i32) -> BigDecimal {
        &self.price * BigDecimal::from(qty)
    }
}

impl NewSection {
    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty() && self.capacity > 0 && self.price >= BigDecimal::zero()
    }
}

impl Event {
    /// Builds a live event whose sections start with `remaining == capacity`.
    pub fn publish(name: String, description: String, sections: Vec<NewSection>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            description,
            status: EventStatus::Live,
            sections: sections.into_iter().map(Section::new).collect(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn section(&self, section_id: Uuid) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == section_id)
    }

    pub fn section_mut(&mut self, section_id: Uuid) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.id == section_id)
    }
}

impl Booking {
    pub fn confirmed(
        event_id: Uuid,
        section: &Section,
        qty: i32,
        user_id: String,
        lock_token: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            event_id,
            section_id: section.id,
            qty,
            user_id,
            total_price: section.total_price(qty),
            status: BookingStatus::Confirmed,
            lock_token,
            created_at: now,
            updated_at: now,
        }
    }
}

impl BookingFilter {
    /// Listings show confirmed bookings unless a status is asked for.
    pub fn status_or_default(&self) -> BookingStatus {
        self.status.unwrap_or(BookingStatus::Confirmed)
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        booking.status == self.status_or_default()
            && self.event_id.map_or(true, |id| booking.event_id == id)
            && self
                .user_id
                .as_deref()
                .map_or(true, |user| booking.user_id == user)
    }
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, page_size: u32, total: u64) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            total.div_ceil(u64::from(page_size))
        };
        Self {
            items,
            page,
            page_size,
            total,
            total_pages,
        }
    }
}
