use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::event::require_non_empty;
use crate::utils::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Confirmed,
    Waitlisted,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Confirmed => "confirmed",
            RegistrationStatus::Waitlisted => "waitlisted",
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(RegistrationStatus::Confirmed),
            "waitlisted" => Ok(RegistrationStatus::Waitlisted),
            other => Err(AppError::ValidationError(format!(
                "Unknown registration status '{}'",
                other
            ))),
        }
    }
}

/// A user's claim on an event. `waitlist_position` is present exactly when
/// the registration is waitlisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: Uuid,
    pub user_id: String,
    pub event_id: String,
    pub status: RegistrationStatus,
    pub registered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waitlist_position: Option<u32>,
}

impl Registration {
    pub fn confirmed(event_id: &str, user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            event_id: event_id.to_string(),
            status: RegistrationStatus::Confirmed,
            registered_at: now,
            waitlist_position: None,
        }
    }

    pub fn waitlisted(event_id: &str, user_id: &str, position: u32, now: DateTime<Utc>) -> Self {
        Self {
            status: RegistrationStatus::Waitlisted,
            waitlist_position: Some(position),
            ..Self::confirmed(event_id, user_id, now)
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == RegistrationStatus::Confirmed
    }

    pub fn is_waitlisted(&self) -> bool {
        self.status == RegistrationStatus::Waitlisted
    }

    pub fn promote(&mut self) {
        self.status = RegistrationStatus::Confirmed;
        self.waitlist_position = None;
    }
}

/// A registration joined with display fields read at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationView {
    #[serde(flatten)]
    pub registration: Registration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub user_id: String,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        require_non_empty("userId", &self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waitlisted_carries_position_and_promote_clears_it() {
        let mut registration = Registration::waitlisted("evt", "ada", 3, Utc::now());
        assert!(registration.is_waitlisted());
        assert_eq!(registration.waitlist_position, Some(3));

        registration.promote();
        assert!(registration.is_confirmed());
        assert_eq!(registration.waitlist_position, None);
    }

    #[test]
    fn test_view_flattens_registration() {
        let view = RegistrationView {
            registration: Registration::confirmed("evt", "ada", Utc::now()),
            event_title: Some("RustConf".to_string()),
            user_name: None,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["eventId"], "evt");
        assert_eq!(json["status"], "confirmed");
        assert_eq!(json["eventTitle"], "RustConf");
        assert!(json.get("userName").is_none());
        assert!(json.get("waitlistPosition").is_none());
    }
}
