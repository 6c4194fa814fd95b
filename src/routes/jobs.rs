use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::models::job::{Job, JobId, JobOptions};
use crate::models::queue::{DeadLetterEntry, QueueMetrics};
use crate::queue::QueueError;

/// Queue API failure rendered as `{ "error": ... }` with a matching status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        let status = match &e {
            QueueError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            QueueError::InvalidOptions(_)
            | QueueError::Bulk { .. }
            | QueueError::DeadLetterQueue(_) => StatusCode::BAD_REQUEST,
            QueueError::InvalidState { .. } | QueueError::LockMismatch(_) => StatusCode::CONFLICT,
            QueueError::Broker(_) | QueueError::Serialize(_) => {
                tracing::error!(error = %e, "Queue operation failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub payload: serde_json::Value,
    #[serde(default)]
    pub options: JobOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub id: JobId,
    pub queue: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ReprocessQuery {
    /// Entries to requeue; 0 or absent means all.
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct ReprocessResponse {
    pub requeued: Vec<JobId>,
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    JobId::parse(raw).map_err(|_| ApiError::bad_request(format!("Invalid job id: {raw}")))
}

/// GET /api/v1/queues: metrics for every known queue.
pub async fn list_queues(State(state): State<AppState>) -> Result<Json<Vec<QueueMetrics>>, ApiError> {
    Ok(Json(state.queue.get_all_metrics().await?))
}

/// POST /api/v1/queues/{queue}/jobs
pub async fn submit_job(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    let job = state
        .queue
        .add_job(&queue, request.payload, request.options)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            id: job.id,
            queue: job.queue,
            status: job.status.to_string(),
        }),
    ))
}

/// GET /api/v1/queues/{queue}/jobs/{id}: the stored job including its progress snapshot.
pub async fn get_job(
    State(state): State<AppState>,
    Path((queue, id)): Path<(String, String)>,
) -> Result<Json<Job>, ApiError> {
    let id = parse_job_id(&id)?;
    let job = state.queue.get_job(&queue, id).await?;
    job.map(Json)
        .ok_or_else(|| QueueError::JobNotFound { queue, id }.into())
}

pub async fn pause_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.queue.pause_queue(&queue).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn resume_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.queue.resume_queue(&queue).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/queues/{queue}/dead-letter
pub async fn list_dead_letters(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<Json<Vec<DeadLetterEntry>>, ApiError> {
    Ok(Json(state.queue.get_dead_letters(&queue).await?))
}

/// POST /api/v1/queues/{queue}/dead-letter/reprocess?limit=N
pub async fn reprocess_dead_letters(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    Query(query): Query<ReprocessQuery>,
) -> Result<Json<ReprocessResponse>, ApiError> {
    let jobs = state
        .queue
        .process_dead_letter_queue(&queue, query.limit)
        .await?;
    Ok(Json(ReprocessResponse {
        requeued: jobs.into_iter().map(|j| j.id).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatus;

    #[test]
    fn test_queue_errors_map_to_statuses() {
        let not_found: ApiError = QueueError::JobNotFound {
            queue: "ocr".to_string(),
            id: JobId::new(),
        }
        .into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let invalid: ApiError = QueueError::InvalidOptions("attempts".to_string()).into();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let state: ApiError = QueueError::InvalidState {
            id: JobId::new(),
            status: JobStatus::Active,
            expected: "failed",
        }
        .into();
        assert_eq!(state.status(), StatusCode::CONFLICT);

        let dead_letter: ApiError =
            QueueError::DeadLetterQueue("ocr:dead-letter".to_string()).into();
        assert_eq!(dead_letter.status(), StatusCode::BAD_REQUEST);

        let broker: ApiError = QueueError::Broker("down".to_string()).into();
        assert_eq!(broker.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_submit_request_defaults_options() {
        let request: SubmitJobRequest =
            serde_json::from_value(serde_json::json!({ "payload": { "path": "/plans/a.png" } }))
                .unwrap();
        assert_eq!(request.options, JobOptions::default());
        assert!(parse_job_id("not-a-uuid").is_err());
    }
}
