use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Prometheus scrape endpoint for the queue counters and processing histogram.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the queue service records.
pub fn describe_queue_metrics() {
    metrics::describe_counter!("queue_jobs_added_total", "Jobs accepted per queue");
    metrics::describe_counter!(
        "queue_jobs_completed_total",
        "Jobs that finished successfully per queue"
    );
    metrics::describe_counter!(
        "queue_jobs_failed_total",
        "Jobs that failed terminally per queue"
    );
    metrics::describe_counter!(
        "queue_jobs_dead_lettered_total",
        "Jobs copied to the dead-letter queue"
    );
    metrics::describe_histogram!(
        "queue_job_processing_seconds",
        metrics::Unit::Seconds,
        "Time from claim to completion"
    );
}
