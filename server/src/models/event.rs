use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::utils::error::AppError;

pub const MAX_TITLE_LEN: usize = 200;

/// Publication state of an event. Only `Active` events accept registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Draft,
    Active,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Draft => "draft",
            EventStatus::Active => "active",
            EventStatus::Cancelled => "cancelled",
        }
    }

    pub fn accepts_registrations(&self) -> bool {
        matches!(self, EventStatus::Active)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(EventStatus::Draft),
            "active" => Ok(EventStatus::Active),
            "cancelled" => Ok(EventStatus::Cancelled),
            other => Err(AppError::ValidationError(format!(
                "Unknown event status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "eventId")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub date: String,
    pub location: String,
    pub organizer: String,
    pub capacity: u32,
    pub current_attendees: u32,
    pub status: EventStatus,
    pub has_waitlist: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waitlist_capacity: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn has_open_seat(&self) -> bool {
        self.current_attendees < self.capacity
    }

    /// Applies the present fields of `patch`. The caller guards the
    /// capacity/attendee invariant.
    pub fn apply(&mut self, patch: &EventPatch, now: DateTime<Utc>) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(date) = &patch.date {
            self.date = date.clone();
        }
        if let Some(location) = &patch.location {
            self.location = location.clone();
        }
        if let Some(organizer) = &patch.organizer {
            self.organizer = organizer.clone();
        }
        if let Some(capacity) = patch.capacity {
            self.capacity = capacity;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(has_waitlist) = patch.has_waitlist {
            self.has_waitlist = has_waitlist;
        }
        if let Some(waitlist_capacity) = patch.waitlist_capacity {
            self.waitlist_capacity = Some(waitlist_capacity);
        }
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    #[serde(default)]
    pub event_id: Option<String>,
    pub title: String,
    pub description: String,
    pub date: String,
    pub location: String,
    pub organizer: String,
    pub capacity: u32,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub has_waitlist: bool,
    #[serde(default)]
    pub waitlist_capacity: Option<u32>,
}

impl CreateEventRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(id) = &self.event_id {
            require_non_empty("eventId", id)?;
        }
        validate_title(&self.title)?;
        require_non_empty("description", &self.description)?;
        require_non_empty("date", &self.date)?;
        require_non_empty("location", &self.location)?;
        require_non_empty("organizer", &self.organizer)?;
        require_positive("capacity", self.capacity)?;
        if let Some(waitlist_capacity) = self.waitlist_capacity {
            require_positive("waitlistCapacity", waitlist_capacity)?;
        }
        Ok(())
    }

    /// Builds a fresh event with no attendees, generating an id when the
    /// caller did not supply one.
    pub fn into_event(self, now: DateTime<Utc>) -> Event {
        Event {
            id: self
                .event_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            title: self.title,
            description: self.description,
            date: self.date,
            location: self.location,
            organizer: self.organizer,
            capacity: self.capacity,
            current_attendees: 0,
            status: self.status,
            has_waitlist: self.has_waitlist,
            waitlist_capacity: self.waitlist_capacity,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub location: Option<String>,
    pub organizer: Option<String>,
    pub capacity: Option<u32>,
    pub status: Option<EventStatus>,
    pub has_waitlist: Option<bool>,
    pub waitlist_capacity: Option<u32>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        *self == EventPatch::default()
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.is_empty() {
            return Err(AppError::ValidationError("No fields to update".to_string()));
        }
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(description) = &self.description {
            require_non_empty("description", description)?;
        }
        if let Some(date) = &self.date {
            require_non_empty("date", date)?;
        }
        if let Some(location) = &self.location {
            require_non_empty("location", location)?;
        }
        if let Some(organizer) = &self.organizer {
            require_non_empty("organizer", organizer)?;
        }
        if let Some(capacity) = self.capacity {
            require_positive("capacity", capacity)?;
        }
        if let Some(waitlist_capacity) = self.waitlist_capacity {
            require_positive("waitlistCapacity", waitlist_capacity)?;
        }
        Ok(())
    }
}

fn validate_title(title: &str) -> Result<(), AppError> {
    require_non_empty("title", title)?;
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::ValidationError(format!(
            "title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(())
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::ValidationError(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}

fn require_positive(field: &str, value: u32) -> Result<(), AppError> {
    if value == 0 {
        return Err(AppError::ValidationError(format!(
            "{} must be greater than zero",
            field
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateEventRequest {
        CreateEventRequest {
            event_id: None,
            title: "RustConf".to_string(),
            description: "Talks".to_string(),
            date: "2026-11-01".to_string(),
            location: "Montreal".to_string(),
            organizer: "Rust Foundation".to_string(),
            capacity: 10,
            status: EventStatus::Active,
            has_waitlist: false,
            waitlist_capacity: None,
        }
    }

    #[test]
    fn test_create_request_rejects_zero_capacity() {
        let mut req = request();
        req.capacity = 0;
        assert_eq!(req.validate().unwrap_err().code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_create_request_rejects_long_title() {
        let mut req = request();
        req.title = "x".repeat(MAX_TITLE_LEN + 1);
        assert!(req.validate().is_err());

        req.title = "x".repeat(MAX_TITLE_LEN);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_into_event_generates_id_and_starts_empty() {
        let event = request().into_event(Utc::now());
        assert!(Uuid::parse_str(&event.id).is_ok());
        assert_eq!(event.current_attendees, 0);
        assert_eq!(event.created_at, event.updated_at);
    }

    #[test]
    fn test_empty_patch_is_rejected() {
        let err = EventPatch::default().validate().unwrap_err();
        assert_eq!(err.to_string(), "Validation error: No fields to update");
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("active".parse::<EventStatus>().unwrap(), EventStatus::Active);
        assert!("published".parse::<EventStatus>().is_err());
        assert!(EventStatus::Active.accepts_registrations());
        assert!(!EventStatus::Draft.accepts_registrations());
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = request().into_event(Utc::now());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventId"], event.id.as_str());
        assert!(json.get("id").is_none());
        assert_eq!(json["currentAttendees"], 0);
        assert_eq!(json["hasWaitlist"], false);
        assert!(json.get("waitlistCapacity").is_none());
    }

    #[test]
    fn test_event_id_round_trips_through_json() {
        let event = request().into_event(Utc::now());
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
