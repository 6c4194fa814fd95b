use std::sync::Arc;

use crate::queue::QueueService;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<QueueService>,
}

impl AppState {
    pub fn new(queue: Arc<QueueService>) -> Self {
        Self { queue }
    }
}
