//! Inbound request shapes and their validation.
//!
//! Validation runs before any lock or store work; a rejected request never
//! touches the coordinator or the inventory store.

use serde::Deserialize;
use shared::{NewSection, MAX_BOOKING_QTY, MIN_BOOKING_QTY};
use uuid::Uuid;

use crate::error::ReservationError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub event_id: Option<String>,
    pub section_id: Option<String>,
    /// Kept as raw JSON so non-integer quantities are reported as
    /// validation errors rather than body parse failures.
    pub qty: Option<serde_json::Value>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidBooking {
    pub event_id: Uuid,
    pub section_id: Uuid,
    pub qty: i32,
    pub user_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishEventRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub sections: Option<Vec<NewSection>>,
}

#[derive(Debug, Clone)]
pub struct ValidEvent {
    pub name: String,
    pub description: String,
    pub sections: Vec<NewSection>,
}

impl BookingRequest {
    pub fn new(event_id: Uuid, section_id: Uuid, qty: i64, user_id: &str) -> Self {
        Self {
            event_id: Some(event_id.to_string()),
            section_id: Some(section_id.to_string()),
            qty: Some(serde_json::Value::from(qty)),
            user_id: Some(user_id.to_string()),
        }
    }

    pub fn validate(&self) -> Result<ValidBooking, ReservationError> {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());

        let mut missing = Vec::new();
        if !present(&self.event_id) {
            missing.push("eventId");
        }
        if !present(&self.section_id) {
            missing.push("sectionId");
        }
        if self.qty.as_ref().map_or(true, serde_json::Value::is_null) {
            missing.push("qty");
        }
        if !present(&self.user_id) {
            missing.push("userId");
        }
        if !missing.is_empty() {
            return Err(ReservationError::Validation(format!(
                "Missing fields: {}",
                missing.join(", ")
            )));
        }

        Ok(ValidBooking {
            event_id: parse_id("eventId", self.event_id.as_deref().unwrap_or_default())?,
            section_id: parse_id("sectionId", self.section_id.as_deref().unwrap_or_default())?,
            qty: parse_qty(self.qty.as_ref())?,
            user_id: self.user_id.as_deref().unwrap_or_default().trim().to_string(),
        })
    }
}

impl PublishEventRequest {
    pub fn validate(self) -> Result<ValidEvent, ReservationError> {
        let name = self.name.unwrap_or_default().trim().to_string();
        let sections = self.sections.unwrap_or_default();
        if name.is_empty() || sections.is_empty() {
            return Err(ReservationError::Validation(
                "Invalid: need name and sections array".into(),
            ));
        }
        if let Some(bad) = sections.iter().find(|s| !s.is_valid()) {
            return Err(ReservationError::Validation(format!(
                "Invalid section '{}': needs a name, a non-negative price and a positive capacity",
                bad.name
            )));
        }
        Ok(ValidEvent {
            name,
            description: self.description.unwrap_or_default(),
            sections,
        })
    }
}

fn parse_id(field: &str, raw: &str) -> Result<Uuid, ReservationError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ReservationError::Validation(format!("{field} is not a valid id")))
}

fn parse_qty(raw: Option<&serde_json::Value>) -> Result<i32, ReservationError> {
    let invalid = || ReservationError::Validation("Invalid quantity".into());

    let number = raw.and_then(serde_json::Value::as_number).ok_or_else(invalid)?;
    let qty = match number.as_i64() {
        Some(qty) => qty,
        None => {
            let float = number.as_f64().ok_or_else(invalid)?;
            if float.fract() != 0.0 {
                return Err(invalid());
            }
            float as i64
        }
    };

    if !(MIN_BOOKING_QTY..=MAX_BOOKING_QTY).contains(&qty) {
        return Err(invalid());
    }
    i32::try_from(qty).map_err(|_| invalid())
}
