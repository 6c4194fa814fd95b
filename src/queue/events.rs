use serde::Serialize;

use crate::models::job::{JobId, Progress};

/// Lifecycle notifications published on the queue service's broadcast channel.
///
/// `Completed` and `Failed` are terminal: each fires exactly once per job.
/// Intermediate attempt failures are reported as `Retrying`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Added {
        queue: String,
        job_id: JobId,
    },
    Active {
        queue: String,
        job_id: JobId,
        attempt: u32,
    },
    Progress {
        queue: String,
        job_id: JobId,
        progress: Progress,
    },
    Completed {
        queue: String,
        job_id: JobId,
        return_value: serde_json::Value,
    },
    Failed {
        queue: String,
        job_id: JobId,
        reason: String,
        attempts_made: u32,
    },
    Retrying {
        queue: String,
        job_id: JobId,
        reason: String,
        attempts_made: u32,
        delay_ms: u64,
    },
    Stalled {
        queue: String,
        job_id: JobId,
    },
    DeadLettered {
        queue: String,
        job_id: JobId,
        dead_letter_id: JobId,
    },
    Removed {
        queue: String,
        job_id: JobId,
    },
    Paused {
        queue: String,
    },
    Resumed {
        queue: String,
    },
    Cleaned {
        queue: String,
        count: usize,
    },
}

impl QueueEvent {
    pub fn queue(&self) -> &str {
        match self {
            QueueEvent::Added { queue, .. }
            | QueueEvent::Active { queue, .. }
            | QueueEvent::Progress { queue, .. }
            | QueueEvent::Completed { queue, .. }
            | QueueEvent::Failed { queue, .. }
            | QueueEvent::Retrying { queue, .. }
            | QueueEvent::Stalled { queue, .. }
            | QueueEvent::DeadLettered { queue, .. }
            | QueueEvent::Removed { queue, .. }
            | QueueEvent::Paused { queue }
            | QueueEvent::Resumed { queue }
            | QueueEvent::Cleaned { queue, .. } => queue,
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        match self {
            QueueEvent::Added { job_id, .. }
            | QueueEvent::Active { job_id, .. }
            | QueueEvent::Progress { job_id, .. }
            | QueueEvent::Completed { job_id, .. }
            | QueueEvent::Failed { job_id, .. }
            | QueueEvent::Retrying { job_id, .. }
            | QueueEvent::Stalled { job_id, .. }
            | QueueEvent::DeadLettered { job_id, .. }
            | QueueEvent::Removed { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueEvent::Completed { .. } | QueueEvent::Failed { .. })
    }
}
