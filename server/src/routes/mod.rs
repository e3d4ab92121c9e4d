use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::create_cors_layer;
use crate::handlers::{events, health_check, registrations, root, users};
use crate::state::AppState;


pub fn create_routes(state: AppState, allowed_origins: &str) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/events", post(events::create_event).get(events::list_events))
        .route(
            "/events/:event_id",
            get(events::get_event)
                .put(events::update_event)
                .delete(events::delete_event),
        )
        .route(
            "/events/:event_id/registrations",
            post(registrations::register).get(registrations::list_event_registrations),
        )
        .route(
            "/events/:event_id/registrations/:user_id",
            delete(registrations::unregister),
        )
        .route("/users", post(users::create_user))
        .route("/users/:user_id", get(users::get_user))
        .route(
            "/users/:user_id/registrations",
            get(users::list_user_registrations),
        )
        .layer(TraceLayer::new_for_http())
        .layer(create_cors_layer(allowed_origins))
        .with_state(state)
}
