use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::broker::{Broker, Outcome, QueueCounters};
use super::error::QueueError;
use crate::models::job::{Job, JobId, JobStatus};

/// Processing-time samples kept per queue for the rolling average.
const MAX_PROCESSING_SAMPLES: usize = 100;

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    paused: bool,
    completed: u64,
    failed: u64,
    samples: VecDeque<i64>,
}

/// In-process broker backed by a map of queues.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    queues: RwLock<HashMap<String, QueueState>>,
    sequence: AtomicI64,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_ready(job: &Job, now: DateTime<Utc>) -> bool {
    match job.status {
        JobStatus::Waiting | JobStatus::Stalled => true,
        JobStatus::Delayed => job.ready_at <= now,
        _ => false,
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn ensure_queue(&self, queue: &str) -> Result<(), QueueError> {
        self.queues
            .write()
            .await
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn queue_names(&self) -> Result<Vec<String>, QueueError> {
        let mut names: Vec<String> = self.queues.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn next_sequence(&self) -> Result<i64, QueueError> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert(&self, job: Job) -> Result<(), QueueError> {
        self.queues
            .write()
            .await
            .entry(job.queue.clone())
            .or_default()
            .jobs
            .insert(job.id, job);
        Ok(())
    }

    async fn insert_many(&self, jobs: Vec<Job>) -> Result<(), QueueError> {
        let mut queues = self.queues.write().await;
        for job in jobs {
            queues
                .entry(job.queue.clone())
                .or_default()
                .jobs
                .insert(job.id, job);
        }
        Ok(())
    }

    async fn get(&self, queue: &str, id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(self
            .queues
            .read()
            .await
            .get(queue)
            .and_then(|q| q.jobs.get(&id))
            .cloned())
    }

    async fn update(&self, job: Job) -> Result<(), QueueError> {
        let mut queues = self.queues.write().await;
        let slot = queues
            .get_mut(&job.queue)
            .and_then(|q| q.jobs.get_mut(&job.id))
            .ok_or_else(|| QueueError::JobNotFound {
                queue: job.queue.clone(),
                id: job.id,
            })?;
        *slot = job;
        Ok(())
    }

    async fn remove(&self, queue: &str, id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(self
            .queues
            .write()
            .await
            .get_mut(queue)
            .and_then(|q| q.jobs.remove(&id)))
    }

    async fn list(&self, queue: &str) -> Result<Vec<Job>, QueueError> {
        Ok(self
            .queues
            .read()
            .await
            .get(queue)
            .map(|q| q.jobs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn claim_next(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        token: Uuid,
    ) -> Result<Option<Job>, QueueError> {
        let mut queues = self.queues.write().await;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(None);
        };
        if state.paused {
            return Ok(None);
        }

        let next = state
            .jobs
            .values()
            .filter(|j| is_ready(j, now))
            .min_by_key(|j| j.schedule_key())
            .map(|j| j.id);
        let Some(id) = next else {
            return Ok(None);
        };

        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.status = JobStatus::Active;
        job.processed_at = Some(now);
        job.finished_at = None;
        job.lock_token = Some(token);
        job.locked_until = Some(locked_until);
        Ok(Some(job.clone()))
    }

    async fn set_paused(&self, queue: &str, paused: bool) -> Result<(), QueueError> {
        self.queues
            .write()
            .await
            .entry(queue.to_string())
            .or_default()
            .paused = paused;
        Ok(())
    }

    async fn is_paused(&self, queue: &str) -> Result<bool, QueueError> {
        Ok(self
            .queues
            .read()
            .await
            .get(queue)
            .map(|q| q.paused)
            .unwrap_or(false))
    }

    async fn record_outcome(
        &self,
        queue: &str,
        outcome: Outcome,
        processing_ms: Option<i64>,
    ) -> Result<(), QueueError> {
        let mut queues = self.queues.write().await;
        let state = queues.entry(queue.to_string()).or_default();
        match outcome {
            Outcome::Completed => state.completed += 1,
            Outcome::Failed => state.failed += 1,
        }
        if let Some(ms) = processing_ms {
            if state.samples.len() == MAX_PROCESSING_SAMPLES {
                state.samples.pop_front();
            }
            state.samples.push_back(ms);
        }
        Ok(())
    }

    async fn counters(&self, queue: &str) -> Result<QueueCounters, QueueError> {
        Ok(self
            .queues
            .read()
            .await
            .get(queue)
            .map(|q| QueueCounters {
                completed: q.completed,
                failed: q.failed,
                processing_samples_ms: q.samples.iter().copied().collect(),
            })
            .unwrap_or_default())
    }
}
