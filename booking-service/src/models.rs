use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use shared::*;

#[derive(Debug, Clone, Queryable, Identifiable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::events)]
pub struct DbEvent {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One section of an event. `position` keeps the publish order.
#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::event_sections)]
pub struct DbSection {
    pub event_id: Uuid,
    pub id: Uuid,
    pub position: i32,
    pub name: String,
    pub price: bigdecimal::BigDecimal,
    pub capacity: i32,
    pub remaining: i32,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::bookings)]
pub struct DbBooking {
    pub id: Uuid,
    pub event_id: Uuid,
    pub section_id: Uuid,
    pub qty: i32,
    pub user_id: String,
    pub total_price: bigdecimal::BigDecimal,
    pub status: String,
    pub lock_token: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Event> for DbEvent {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            name: event.name.clone(),
            description: event.description.clone(),
            status: event.status.as_str().to_string(),
            created_at: Some(event.created_at),
            updated_at: Some(event.updated_at),
        }
    }
}

impl DbSection {
    pub fn rows(event: &Event) -> Vec<Self> {
        event
            .sections
            .iter()
            .zip(0..)
            .map(|(section, position)| Self {
                event_id: event.id,
                id: section.id,
                position,
                name: section.name.clone(),
                price: section.price.clone(),
                capacity: section.capacity,
                remaining: section.remaining,
                updated_at: Some(event.updated_at),
            })
            .collect()
    }
}

impl From<DbSection> for Section {
    fn from(row: DbSection) -> Self {
        Self {
            id: row.id,
            name: row.name,
            price: row.price,
            capacity: row.capacity,
            remaining: row.remaining,
        }
    }
}

impl DbEvent {
    pub fn into_event(self, mut rows: Vec<DbSection>) -> Result<Event, anyhow::Error> {
        let db_event = self;
        let status = db_event.status.parse::<EventStatus>()?;
        rows.sort_by_key(|row| row.position);

        Ok(Event {
            id: db_event.id,
            name: db_event.name,
            description: db_event.description,
            status,
            sections: rows.into_iter().map(Section::from).collect(),
            created_at: db_event.created_at.unwrap_or_else(Utc::now),
            updated_at: db_event.updated_at.unwrap_or_else(Utc::now),
        })
    }
}

impl From<&Booking> for DbBooking {
    fn from(booking: &Booking) -> Self {
        Self {
            id: booking.id,
            event_id: booking.event_id,
            section_id: booking.section_id,
            qty: booking.qty,
            user_id: booking.user_id.clone(),
            total_price: booking.total_price.clone(),
            status: booking.status.as_str().to_string(),
            lock_token: booking.lock_token.clone(),
            created_at: Some(booking.created_at),
            updated_at: Some(booking.updated_at),
        }
    }
}

impl TryFrom<DbBooking> for Booking {
    type Error = anyhow::Error;

    fn try_from(db_booking: DbBooking) -> Result<Self, Self::Error> {
        let status = db_booking.status.parse::<BookingStatus>()?;

        Ok(Self {
            id: db_booking.id,
            event_id: db_booking.event_id,
            section_id: db_booking.section_id,
            qty: db_booking.qty,
            user_id: db_booking.user_id,
            total_price: db_booking.total_price,
            status,
            lock_token: db_booking.lock_token,
            created_at: db_booking.created_at.unwrap_or_else(Utc::now),
            updated_at: db_booking.updated_at.unwrap_or_else(Utc::now),
        })
    }
}
