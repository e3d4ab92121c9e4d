use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;

use super::{json_body, StatusQuery};
use crate::models::{CreateEventRequest, EventPatch, EventStatus};
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::{created, no_content, success};

pub async fn create_event(
    State(state): State<AppState>,
    body: Result<Json<CreateEventRequest>, JsonRejection>,
) -> AppResult<Response> {
    let event = state.engine.create_event(json_body(body)?).await?;
    Ok(created(event, "Event created"))
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> AppResult<Response> {
    let status = query.parse::<EventStatus>()?;
    let events = state.engine.list_events(status).await?;
    Ok(success(events, "Events retrieved"))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> AppResult<Response> {
    let event = state.engine.get_event(&event_id).await?;
    Ok(success(event, "Event retrieved"))
}

pub async fn update_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    body: Result<Json<EventPatch>, JsonRejection>,
) -> AppResult<Response> {
    let event = state
        .engine
        .update_event(&event_id, json_body(body)?)
        .await?;
    Ok(success(event, "Event updated"))
}

pub async fn delete_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> AppResult<Response> {
    state.engine.delete_event(&event_id).await?;
    Ok(no_content())
}
