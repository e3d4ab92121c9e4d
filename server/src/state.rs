use std::sync::Arc;
use std::time::Duration;

use crate::engine::RegistrationEngine;
use crate::store::EntityStore;

/// Shared by every handler through axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RegistrationEngine>,
}

impl AppState {
    pub fn new(store: Arc<dyn EntityStore>, operation_timeout: Duration) -> Self {
        Self {
            engine: Arc::new(RegistrationEngine::new(store, operation_timeout)),
        }
    }
}
