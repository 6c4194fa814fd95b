use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority. Lower numeric value dequeues first.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    Critical = 1,
    High = 2,
    #[default]
    Normal = 3,
    Low = 4,
}

impl Priority {
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
    Stalled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Waiting,
        JobStatus::Active,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Delayed,
        JobStatus::Stalled,
    ];

    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Delay applied before a failed job re-enters `waiting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackoffPolicy {
    /// `delay * 2^attempt_index`
    Exponential { delay_ms: u64 },
    Fixed { delay_ms: u64 },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential { delay_ms: 2_000 }
    }
}

impl BackoffPolicy {
    /// Delay before the retry that follows the `attempt_index`-th failure (0-based).
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        match *self {
            BackoffPolicy::Exponential { delay_ms } => {
                let factor = 1u64.checked_shl(attempt_index).unwrap_or(u64::MAX);
                Duration::from_millis(delay_ms.saturating_mul(factor))
            }
            BackoffPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
        }
    }
}

/// Submission options. Missing fields fall back to the queue defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    #[garde(skip)]
    #[serde(default)]
    pub priority: Priority,

    /// Initial delay in milliseconds.
    #[garde(skip)]
    #[serde(default)]
    pub delay: Option<u64>,

    #[garde(range(min = 1, max = 100))]
    #[serde(default)]
    pub attempts: Option<u32>,

    #[garde(skip)]
    #[serde(default)]
    pub backoff: Option<BackoffPolicy>,

    /// Hard processing timeout in milliseconds.
    #[garde(range(min = 1))]
    #[serde(default)]
    pub timeout: Option<u64>,

    #[garde(skip)]
    #[serde(default)]
    pub lifo: bool,

    #[garde(skip)]
    #[serde(default)]
    pub remove_on_complete: bool,

    #[garde(skip)]
    #[serde(default)]
    pub remove_on_fail: bool,
}

impl JobOptions {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay.as_millis() as u64);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.as_millis() as u64);
        self
    }
}

/// Snapshot of a job's progress within its current attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub stage: String,
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Progress {
    pub fn new(stage: impl Into<String>, progress: u8, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            progress: progress.min(100),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A unit of queued work. Owned by the broker; a worker holds a lease
/// (`lock_token`) while the job is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub attempts_made: u32,
    pub attempts: u32,
    pub backoff: BackoffPolicy,
    /// Hard timeout in milliseconds; `None` defers to the worker default.
    pub timeout_ms: Option<u64>,
    pub status: JobStatus,
    pub progress: Progress,
    pub lifo: bool,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
    /// Arrival order, used as the FIFO tie-break within a priority.
    pub sequence: i64,
    pub ready_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_token: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stalled_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_history: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentRef>,
}

/// Reference to the job a dependent job was created after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub queue: String,
    pub id: JobId,
}

impl Job {
    /// Ordering key among ready jobs: priority, then arrival (LIFO jobs carry a
    /// negated sequence so they sort ahead of FIFO jobs of the same priority).
    pub fn schedule_key(&self) -> (u8, i64) {
        (self.priority.value(), self.sequence)
    }

    /// Options that resubmit this job with the same scheduling behaviour and
    /// a fresh attempt budget.
    pub fn resubmit_options(&self) -> JobOptions {
        JobOptions {
            priority: self.priority,
            delay: None,
            attempts: Some(self.attempts.clamp(1, 100)),
            backoff: Some(self.backoff),
            timeout: self.timeout_ms,
            lifo: self.lifo,
            remove_on_complete: self.remove_on_complete,
            remove_on_fail: self.remove_on_fail,
        }
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.attempts.saturating_sub(self.attempts_made)
    }

    pub fn processing_time_ms(&self) -> Option<i64> {
        match (self.processed_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!("critical".parse::<Priority>().unwrap(), Priority::Critical);
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = BackoffPolicy::Exponential { delay_ms: 100 };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_fixed_backoff() {
        let policy = BackoffPolicy::Fixed { delay_ms: 250 };
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(5), Duration::from_millis(250));
    }

    #[test]
    fn test_options_reject_zero_attempts() {
        let options = JobOptions::default().with_attempts(0);
        assert!(options.validate().is_err());
        assert!(JobOptions::default().with_attempts(1).validate().is_ok());
    }

    #[test]
    fn test_options_deserialize_camel_case() {
        let options: JobOptions = serde_json::from_value(serde_json::json!({
            "priority": "high",
            "attempts": 5,
            "removeOnComplete": true,
            "backoff": { "type": "fixed", "delay_ms": 10 }
        }))
        .unwrap();
        assert_eq!(options.priority, Priority::High);
        assert_eq!(options.attempts, Some(5));
        assert!(options.remove_on_complete);
        assert_eq!(options.backoff, Some(BackoffPolicy::Fixed { delay_ms: 10 }));
    }

    #[test]
    fn test_progress_is_clamped() {
        assert_eq!(Progress::new("x", 150, "").progress, 100);
    }
}
