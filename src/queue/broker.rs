//! Storage seam for the queue service.
//!
//! The broker owns job records and per-queue counters. Scheduling policy,
//! retries and events live in [`QueueService`](super::QueueService); a broker
//! only has to store, list and atomically claim.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::QueueError;
use crate::models::job::{Job, JobId};

/// Terminal outcome recorded against a queue's cumulative counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

/// Cumulative counters and recent processing-time samples for one queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueCounters {
    pub completed: u64,
    pub failed: u64,
    pub processing_samples_ms: Vec<i64>,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Make the queue known even before it holds any job.
    async fn ensure_queue(&self, queue: &str) -> Result<(), QueueError>;

    async fn queue_names(&self) -> Result<Vec<String>, QueueError>;

    /// Monotonic arrival counter shared by all queues.
    async fn next_sequence(&self) -> Result<i64, QueueError>;

    async fn insert(&self, job: Job) -> Result<(), QueueError>;

    /// Insert all jobs or none.
    async fn insert_many(&self, jobs: Vec<Job>) -> Result<(), QueueError>;

    async fn get(&self, queue: &str, id: JobId) -> Result<Option<Job>, QueueError>;

    /// Replace a stored job. Fails with `JobNotFound` if it was removed.
    async fn update(&self, job: Job) -> Result<(), QueueError>;

    async fn remove(&self, queue: &str, id: JobId) -> Result<Option<Job>, QueueError>;

    async fn list(&self, queue: &str) -> Result<Vec<Job>, QueueError>;

    /// Atomically pick the next ready job of a non-paused queue, mark it
    /// active under `token` until `locked_until`, and return it.
    async fn claim_next(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        token: Uuid,
    ) -> Result<Option<Job>, QueueError>;

    async fn set_paused(&self, queue: &str, paused: bool) -> Result<(), QueueError>;

    async fn is_paused(&self, queue: &str) -> Result<bool, QueueError>;

    async fn record_outcome(
        &self,
        queue: &str,
        outcome: Outcome,
        processing_ms: Option<i64>,
    ) -> Result<(), QueueError>;

    async fn counters(&self, queue: &str) -> Result<QueueCounters, QueueError>;
}
