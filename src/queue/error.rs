use crate::models::job::{JobId, JobStatus};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job {id} not found in queue {queue}")]
    JobNotFound { queue: String, id: JobId },

    #[error("Invalid job options: {0}")]
    InvalidOptions(String),

    #[error("Job {id} is {status}, expected {expected}")]
    InvalidState {
        id: JobId,
        status: JobStatus,
        expected: &'static str,
    },

    #[error("Lock for job {0} is no longer held by this worker")]
    LockMismatch(JobId),

    #[error("Bulk entry {index} rejected: {reason}")]
    Bulk { index: usize, reason: String },

    #[error("Operation not supported on dead-letter queue {0}")]
    DeadLetterQueue(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
