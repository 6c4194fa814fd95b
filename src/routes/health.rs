use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::models::queue::{HealthStatus, QueueHealth};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub queues: Vec<QueueHealth>,
}

/// Worst classification across queues; healthy when there are none.
pub fn overall_status(queues: &[QueueHealth]) -> HealthStatus {
    let mut overall = HealthStatus::Healthy;
    for queue in queues {
        match queue.status {
            HealthStatus::Unhealthy => return HealthStatus::Unhealthy,
            HealthStatus::Degraded => overall = HealthStatus::Degraded,
            HealthStatus::Healthy => {}
        }
    }
    overall
}

/// GET /health: per-queue health classification.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let queues = match state.queue.get_health_status().await {
        Ok(queues) => queues,
        Err(e) => {
            tracing::error!(error = %e, "Health check could not read queue metrics");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: HealthStatus::Unhealthy,
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    queues: Vec::new(),
                }),
            );
        }
    };

    let status = overall_status(&queues);
    let status_code = if status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            queues,
        }),
    )
}
