pub mod health;
pub mod jobs;
pub mod metrics;

use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

/// Health and queue operation routes. `/metrics` is mounted separately since
/// it needs the recorder handle.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/queues", get(jobs::list_queues))
        .route("/api/v1/queues/{queue}/jobs", post(jobs::submit_job))
        .route("/api/v1/queues/{queue}/jobs/{id}", get(jobs::get_job))
        .route("/api/v1/queues/{queue}/pause", post(jobs::pause_queue))
        .route("/api/v1/queues/{queue}/resume", post(jobs::resume_queue))
        .route(
            "/api/v1/queues/{queue}/dead-letter",
            get(jobs::list_dead_letters),
        )
        .route(
            "/api/v1/queues/{queue}/dead-letter/reprocess",
            post(jobs::reprocess_dead_letters),
        )
        .with_state(state)
}
