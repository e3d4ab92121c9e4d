use axum::extract::rejection::JsonRejection;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::utils::error::{AppError, AppResult};
use crate::utils::response::success;

pub mod events;
pub mod registrations;
pub mod users;

const SERVICE_NAME: &str = "roster-api";

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

#[derive(Serialize)]
struct ServiceInfo {
    service: &'static str,
    version: &'static str,
}

pub async fn root() -> Response {
    let payload = ServiceInfo {
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    };

    success(payload, "Event registration API")
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: SERVICE_NAME,
    };

    success(payload, "Health check successful")
}

/// `?status=` filter shared by the listing endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub status: Option<String>,
}

impl StatusQuery {
    pub fn parse<S>(&self) -> AppResult<Option<S>>
    where
        S: FromStr<Err = AppError>,
    {
        self.status
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(S::from_str)
            .transpose()
    }
}

/// Unwraps a JSON body, reporting malformed input in the API error envelope
/// instead of axum's plain-text rejection.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::ValidationError(rejection.body_text()))
}
