use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::job::{JobId, JobOptions};

/// Suffix naming the dead-letter queue that belongs to a queue.
pub const DEAD_LETTER_SUFFIX: &str = ":dead-letter";

pub fn dead_letter_queue_name(queue: &str) -> String {
    format!("{queue}{DEAD_LETTER_SUFFIX}")
}

pub fn is_dead_letter_queue(queue: &str) -> bool {
    queue.ends_with(DEAD_LETTER_SUFFIX)
}

/// Derived health classification of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Read-only view of a queue's state. `completed` and `failed` are cumulative
/// outcome counters; the other counts reflect jobs currently stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub queue: String,
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub stalled: u64,
    pub dead_letter: u64,
    pub paused: bool,
    /// Mean of `finished - processed` over the most recent finished jobs.
    pub avg_processing_time_ms: Option<f64>,
    /// Percentage of finished jobs that completed, 100 when none finished yet.
    pub success_rate: f64,
}

impl QueueMetrics {
    pub fn health(&self) -> HealthStatus {
        let completed = self.completed as f64;
        let failed = self.failed as f64;
        if failed > 0.5 * completed || self.paused {
            HealthStatus::Unhealthy
        } else if failed > 0.1 * completed || self.active > 2 * self.waiting {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Health of one queue together with the metrics it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueHealth {
    pub status: HealthStatus,
    pub metrics: QueueMetrics,
}

impl From<QueueMetrics> for QueueHealth {
    fn from(metrics: QueueMetrics) -> Self {
        Self {
            status: metrics.health(),
            metrics,
        }
    }
}

/// Snapshot of a job that exhausted its retries. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub queue: String,
    pub original_job_id: JobId,
    pub payload: serde_json::Value,
    pub failure_reason: String,
    pub attempts_made: u32,
    pub failed_at: DateTime<Utc>,
    /// Submission options of the failed job, reused on reprocessing.
    #[serde(default)]
    pub options: JobOptions,
}
