use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;

use super::{json_body, StatusQuery};
use crate::models::{CreateUserRequest, RegistrationStatus};
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::{created, success};

pub async fn create_user(
    State(state): State<AppState>,
    body: Result<Json<CreateUserRequest>, JsonRejection>,
) -> AppResult<Response> {
    let user = state.engine.create_user(json_body(body)?).await?;
    Ok(created(user, "User created"))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Response> {
    let user = state.engine.get_user(&user_id).await?;
    Ok(success(user, "User retrieved"))
}

pub async fn list_user_registrations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> AppResult<Response> {
    let status = query.parse::<RegistrationStatus>()?;
    let registrations = state
        .engine
        .list_user_registrations(&user_id, status)
        .await?;
    Ok(success(registrations, "Registrations retrieved"))
}
