use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;

use super::{json_body, StatusQuery};
use crate::models::{RegisterRequest, RegistrationStatus};
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::{created, no_content, success};

pub async fn register(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<Response> {
    let request = json_body(body)?;
    request.validate()?;

    let registration = state.engine.register(&event_id, &request.user_id).await?;
    let message = if registration.is_confirmed() {
        "Registration confirmed"
    } else {
        "Added to waitlist"
    };
    Ok(created(registration, message))
}

pub async fn list_event_registrations(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> AppResult<Response> {
    let status = query.parse::<RegistrationStatus>()?;
    let registrations = state
        .engine
        .list_event_registrations(&event_id, status)
        .await?;
    Ok(success(registrations, "Registrations retrieved"))
}

pub async fn unregister(
    State(state): State<AppState>,
    Path((event_id, user_id)): Path<(String, String)>,
) -> AppResult<Response> {
    state.engine.unregister(&event_id, &user_id).await?;
    Ok(no_content())
}
