pub mod health_handlers;
pub mod upload_handlers;

use crate::services::manager::Manager;
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
}

impl AppState {
    pub fn new(manager: Manager) -> Self {
        Self {
            manager: Arc::new(manager),
        }
    }
}
