use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::event::require_non_empty;
use crate::utils::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "userId")]
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl CreateUserRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        require_non_empty("userId", &self.user_id)?;
        require_non_empty("name", &self.name)?;
        if let Some(email) = &self.email {
            require_non_empty("email", email)?;
        }
        Ok(())
    }

    pub fn into_user(self, now: DateTime<Utc>) -> User {
        User {
            id: self.user_id,
            name: self.name,
            email: self.email,
            created_at: now,
        }
    }
}
