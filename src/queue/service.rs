use std::future::Future;
use std::ops::Range;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::broker::{Broker, Outcome};
use super::error::QueueError;
use super::events::QueueEvent;
use crate::models::job::{BackoffPolicy, Job, JobId, JobOptions, JobStatus, ParentRef, Progress};
use crate::models::queue::{
    dead_letter_queue_name, is_dead_letter_queue, DeadLetterEntry, QueueHealth, QueueMetrics,
};
use crate::workers::PipelineError;

/// Reason recorded when a job exceeds its stall allowance.
const STALLED_LIMIT_REASON: &str = "job stalled more than allowable limit";

/// Cleanup work handed to [`QueueService::handle_job_failure`].
pub type CleanupFuture<'a> = Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub default_attempts: u32,
    pub default_backoff: BackoffPolicy,
    /// Lease length granted on claim and on every lock extension.
    pub lock_duration: Duration,
    /// Stall recoveries allowed before a job is failed outright.
    pub max_stalled_count: u32,
    /// Delay applied to jobs created through `create_job_dependency`.
    pub dependency_delay: Duration,
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_attempts: 3,
            default_backoff: BackoffPolicy::default(),
            lock_duration: Duration::from_secs(30),
            max_stalled_count: 1,
            dependency_delay: Duration::from_secs(5),
            event_capacity: 1024,
        }
    }
}

/// One entry of a bulk submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewJob {
    pub payload: serde_json::Value,
    #[serde(default)]
    pub options: JobOptions,
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    Retrying { delay: Duration },
    DeadLettered { dead_letter_id: JobId },
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Multi-queue job service: lifecycle, priority scheduling, retries with
/// backoff, dead-lettering and derived metrics over an injected [`Broker`].
pub struct QueueService {
    broker: Arc<dyn Broker>,
    config: QueueConfig,
    events: broadcast::Sender<QueueEvent>,
    // Serializes read-modify-write sequences against the broker.
    write_lock: Mutex<()>,
}

impl QueueService {
    pub fn new(broker: Arc<dyn Broker>, config: QueueConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            broker,
            config,
            events,
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Make a queue visible to metrics before any job is submitted.
    pub async fn register_queue(&self, queue: &str) -> Result<(), QueueError> {
        self.broker.ensure_queue(queue).await
    }

    /// Dead-letter queues are written only by failure handling.
    fn ensure_submittable(queue: &str) -> Result<(), QueueError> {
        if is_dead_letter_queue(queue) {
            return Err(QueueError::DeadLetterQueue(queue.to_string()));
        }
        Ok(())
    }

    async fn sequence_for(&self, lifo: bool) -> Result<i64, QueueError> {
        let seq = self.broker.next_sequence().await?;
        Ok(if lifo { -seq } else { seq })
    }

    async fn build_job(
        &self,
        queue: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<Job, QueueError> {
        options
            .validate()
            .map_err(|report| QueueError::InvalidOptions(report.to_string()))?;

        let now = Utc::now();
        let delay = options.delay.filter(|ms| *ms > 0).map(Duration::from_millis);
        Ok(Job {
            id: JobId::new(),
            queue: queue.to_string(),
            payload,
            priority: options.priority,
            attempts_made: 0,
            attempts: options.attempts.unwrap_or(self.config.default_attempts).max(1),
            backoff: options.backoff.unwrap_or(self.config.default_backoff),
            timeout_ms: options.timeout,
            status: if delay.is_some() {
                JobStatus::Delayed
            } else {
                JobStatus::Waiting
            },
            progress: Progress::default(),
            lifo: options.lifo,
            remove_on_complete: options.remove_on_complete,
            remove_on_fail: options.remove_on_fail,
            sequence: self.sequence_for(options.lifo).await?,
            ready_at: delay.map(|d| after(now, d)).unwrap_or(now),
            created_at: now,
            processed_at: None,
            finished_at: None,
            lock_token: None,
            locked_until: None,
            stalled_count: 0,
            failed_reason: None,
            error_history: Vec::new(),
            return_value: None,
            parent: None,
        })
    }

    fn announce_added(&self, job: &Job) {
        metrics::counter!("queue_jobs_added_total", "queue" => job.queue.clone()).increment(1);
        tracing::info!(
            job_id = %job.id,
            queue = %job.queue,
            priority = %job.priority,
            status = %job.status,
            "Job added"
        );
        self.emit(QueueEvent::Added {
            queue: job.queue.clone(),
            job_id: job.id,
        });
    }

    pub async fn add_job(
        &self,
        queue: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<Job, QueueError> {
        Self::ensure_submittable(queue)?;
        let job = self.build_job(queue, payload, options).await?;
        self.broker.insert(job.clone()).await?;
        self.announce_added(&job);
        Ok(job)
    }

    /// Validate every entry first, then insert the batch in one broker call.
    /// A rejected entry aborts the whole batch and names its index.
    pub async fn add_bulk_jobs(
        &self,
        queue: &str,
        entries: Vec<NewJob>,
    ) -> Result<Vec<Job>, QueueError> {
        Self::ensure_submittable(queue)?;
        let mut jobs = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let job = self
                .build_job(queue, entry.payload, entry.options)
                .await
                .map_err(|e| QueueError::Bulk {
                    index,
                    reason: e.to_string(),
                })?;
            jobs.push(job);
        }
        self.broker.insert_many(jobs.clone()).await?;
        for job in &jobs {
            self.announce_added(job);
        }
        Ok(jobs)
    }

    pub async fn get_job(&self, queue: &str, id: JobId) -> Result<Option<Job>, QueueError> {
        self.broker.get(queue, id).await
    }

    async fn require_job(&self, queue: &str, id: JobId) -> Result<Job, QueueError> {
        self.broker
            .get(queue, id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound {
                queue: queue.to_string(),
                id,
            })
    }

    /// The stored job, provided the caller still holds its lease.
    async fn leased_job(&self, job: &Job) -> Result<Job, QueueError> {
        let stored = self.require_job(&job.queue, job.id).await?;
        if stored.status != JobStatus::Active
            || job.lock_token.is_none()
            || stored.lock_token != job.lock_token
        {
            return Err(QueueError::LockMismatch(job.id));
        }
        Ok(stored)
    }

    pub async fn get_job_progress(
        &self,
        queue: &str,
        id: JobId,
    ) -> Result<Option<Progress>, QueueError> {
        Ok(self.broker.get(queue, id).await?.map(|j| j.progress))
    }

    /// Overwrite the progress snapshot of a leased job. The percentage never
    /// moves backwards within an attempt.
    pub async fn update_job_progress(
        &self,
        job: &Job,
        progress: Progress,
    ) -> Result<Progress, QueueError> {
        let _guard = self.write_lock.lock().await;
        let mut stored = self.leased_job(job).await?;

        let mut progress = progress;
        progress.progress = progress.progress.min(100).max(stored.progress.progress);
        stored.progress = progress.clone();
        self.broker.update(stored).await?;

        tracing::debug!(
            job_id = %job.id,
            queue = %job.queue,
            stage = %progress.stage,
            progress = progress.progress,
            "Job progress"
        );
        self.emit(QueueEvent::Progress {
            queue: job.queue.clone(),
            job_id: job.id,
            progress: progress.clone(),
        });
        Ok(progress)
    }

    /// Jobs in any of `statuses` (all when empty), in dequeue order, sliced by `range`.
    pub async fn get_jobs(
        &self,
        queue: &str,
        statuses: &[JobStatus],
        range: Range<usize>,
    ) -> Result<Vec<Job>, QueueError> {
        let mut jobs: Vec<Job> = self
            .broker
            .list(queue)
            .await?
            .into_iter()
            .filter(|j| statuses.is_empty() || statuses.contains(&j.status))
            .collect();
        jobs.sort_by_key(|j| j.schedule_key());
        Ok(jobs
            .into_iter()
            .skip(range.start)
            .take(range.end.saturating_sub(range.start))
            .collect())
    }

    /// Send a failed job back to `waiting` with one more allowed attempt.
    /// Any dead-letter entry recorded for it is withdrawn.
    pub async fn retry_job(&self, queue: &str, id: JobId) -> Result<Job, QueueError> {
        Self::ensure_submittable(queue)?;
        let _guard = self.write_lock.lock().await;
        let mut job = self.require_job(queue, id).await?;
        if job.status != JobStatus::Failed {
            return Err(QueueError::InvalidState {
                id,
                status: job.status,
                expected: "failed",
            });
        }

        job.status = JobStatus::Waiting;
        job.attempts = job.attempts.max(job.attempts_made) + 1;
        job.failed_reason = None;
        job.finished_at = None;
        job.progress = Progress::default();
        job.sequence = self.sequence_for(job.lifo).await?;
        job.ready_at = Utc::now();
        self.broker.update(job.clone()).await?;

        let dlq = dead_letter_queue_name(queue);
        for entry in self.broker.list(&dlq).await? {
            let matches = serde_json::from_value::<DeadLetterEntry>(entry.payload.clone())
                .map(|e| e.original_job_id == id)
                .unwrap_or(false);
            if matches {
                self.broker.remove(&dlq, entry.id).await?;
            }
        }

        tracing::info!(job_id = %id, queue = %queue, attempts = job.attempts, "Job retried");
        self.emit(QueueEvent::Added {
            queue: queue.to_string(),
            job_id: id,
        });
        Ok(job)
    }

    /// Remove a job that is not currently leased. Returns whether it existed.
    pub async fn remove_job(&self, queue: &str, id: JobId) -> Result<bool, QueueError> {
        let _guard = self.write_lock.lock().await;
        let Some(job) = self.broker.get(queue, id).await? else {
            return Ok(false);
        };
        if job.status == JobStatus::Active {
            return Err(QueueError::InvalidState {
                id,
                status: job.status,
                expected: "not active",
            });
        }
        self.broker.remove(queue, id).await?;
        self.emit(QueueEvent::Removed {
            queue: queue.to_string(),
            job_id: id,
        });
        Ok(true)
    }

    /// Drop every waiting, delayed and stalled job. Active jobs are left to finish.
    pub async fn empty_queue(&self, queue: &str) -> Result<usize, QueueError> {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        for job in self.broker.list(queue).await? {
            if matches!(
                job.status,
                JobStatus::Waiting | JobStatus::Delayed | JobStatus::Stalled
            ) {
                self.broker.remove(queue, job.id).await?;
                removed += 1;
            }
        }
        tracing::info!(queue = %queue, removed, "Queue emptied");
        Ok(removed)
    }

    /// Remove up to `limit` jobs (0 = no limit) in `status` older than `grace`,
    /// oldest first. Age is measured from `finished_at`, else `created_at`.
    pub async fn clean_queue(
        &self,
        queue: &str,
        grace: Duration,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<JobId>, QueueError> {
        if status == JobStatus::Active {
            return Err(QueueError::InvalidOptions(
                "active jobs cannot be cleaned".to_string(),
            ));
        }
        let _guard = self.write_lock.lock().await;
        let cutoff = Utc::now() - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());

        let mut candidates: Vec<(DateTime<Utc>, JobId)> = self
            .broker
            .list(queue)
            .await?
            .into_iter()
            .filter(|j| j.status == status)
            .map(|j| (j.finished_at.unwrap_or(j.created_at), j.id))
            .filter(|(at, _)| *at <= cutoff)
            .collect();
        candidates.sort();
        if limit > 0 {
            candidates.truncate(limit);
        }

        let mut cleaned = Vec::with_capacity(candidates.len());
        for (_, id) in candidates {
            if self.broker.remove(queue, id).await?.is_some() {
                cleaned.push(id);
            }
        }
        tracing::info!(queue = %queue, status = %status, count = cleaned.len(), "Queue cleaned");
        self.emit(QueueEvent::Cleaned {
            queue: queue.to_string(),
            count: cleaned.len(),
        });
        Ok(cleaned)
    }

    pub async fn pause_queue(&self, queue: &str) -> Result<(), QueueError> {
        self.broker.set_paused(queue, true).await?;
        tracing::info!(queue = %queue, "Queue paused");
        self.emit(QueueEvent::Paused {
            queue: queue.to_string(),
        });
        Ok(())
    }

    pub async fn resume_queue(&self, queue: &str) -> Result<(), QueueError> {
        self.broker.set_paused(queue, false).await?;
        tracing::info!(queue = %queue, "Queue resumed");
        self.emit(QueueEvent::Resumed {
            queue: queue.to_string(),
        });
        Ok(())
    }

    /// Lease the next ready job, if any. The returned job carries the lock
    /// token that later calls must present.
    pub async fn claim_job(&self, queue: &str) -> Result<Option<Job>, QueueError> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let job = self
            .broker
            .claim_next(
                queue,
                now,
                after(now, self.config.lock_duration),
                Uuid::new_v4(),
            )
            .await?;
        if let Some(job) = &job {
            tracing::debug!(
                job_id = %job.id,
                queue = %queue,
                attempt = job.attempts_made + 1,
                "Job claimed"
            );
            self.emit(QueueEvent::Active {
                queue: queue.to_string(),
                job_id: job.id,
                attempt: job.attempts_made + 1,
            });
        }
        Ok(job)
    }

    pub async fn extend_lock(&self, job: &Job) -> Result<DateTime<Utc>, QueueError> {
        let _guard = self.write_lock.lock().await;
        let mut stored = self.leased_job(job).await?;
        let until = after(Utc::now(), self.config.lock_duration);
        stored.locked_until = Some(until);
        self.broker.update(stored).await?;
        Ok(until)
    }

    pub async fn complete_job(
        &self,
        job: &Job,
        return_value: serde_json::Value,
    ) -> Result<(), QueueError> {
        let _guard = self.write_lock.lock().await;
        let mut stored = self.leased_job(job).await?;

        stored.status = JobStatus::Completed;
        stored.finished_at = Some(Utc::now());
        stored.lock_token = None;
        stored.locked_until = None;
        stored.return_value = Some(return_value.clone());
        let processing_ms = stored.processing_time_ms();

        if stored.remove_on_complete {
            self.broker.remove(&stored.queue, stored.id).await?;
        } else {
            self.broker.update(stored).await?;
        }
        self.broker
            .record_outcome(&job.queue, Outcome::Completed, processing_ms)
            .await?;

        metrics::counter!("queue_jobs_completed_total", "queue" => job.queue.clone())
            .increment(1);
        if let Some(ms) = processing_ms {
            metrics::histogram!("queue_job_processing_seconds", "queue" => job.queue.clone())
                .record(ms as f64 / 1000.0);
        }
        tracing::info!(job_id = %job.id, queue = %job.queue, processing_ms, "Job completed");
        self.emit(QueueEvent::Completed {
            queue: job.queue.clone(),
            job_id: job.id,
            return_value,
        });
        Ok(())
    }

    /// Record a failed attempt. Runs `cleanup` first (its failure is only
    /// logged), then either schedules a retry after the job's backoff or, when
    /// the error is permanent or attempts are exhausted, fails the job and
    /// files it in `<queue>:dead-letter`.
    pub async fn handle_job_failure(
        &self,
        job: &Job,
        error: &PipelineError,
        cleanup: Option<CleanupFuture<'_>>,
    ) -> Result<FailureOutcome, QueueError> {
        if let Some(cleanup) = cleanup {
            if let Err(e) = cleanup.await {
                tracing::warn!(job_id = %job.id, queue = %job.queue, error = %e, "Cleanup after failure did not complete");
            }
        }

        let _guard = self.write_lock.lock().await;
        let stored = self.leased_job(job).await?;
        self.fail_attempt(stored, error.to_string(), error.is_retryable())
            .await
    }

    async fn fail_attempt(
        &self,
        mut job: Job,
        reason: String,
        retryable: bool,
    ) -> Result<FailureOutcome, QueueError> {
        let now = Utc::now();
        job.attempts_made += 1;
        job.error_history.push(reason.clone());
        job.failed_reason = Some(reason.clone());
        job.lock_token = None;
        job.locked_until = None;

        if retryable && job.attempts_made < job.attempts {
            let delay = job.backoff.delay_for(job.attempts_made - 1);
            job.status = if delay.is_zero() {
                JobStatus::Waiting
            } else {
                JobStatus::Delayed
            };
            job.ready_at = after(now, delay);
            job.sequence = self.sequence_for(job.lifo).await?;
            job.progress = Progress::default();
            self.broker.update(job.clone()).await?;

            tracing::warn!(
                job_id = %job.id,
                queue = %job.queue,
                attempts_made = job.attempts_made,
                attempts = job.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %reason,
                "Job attempt failed, retrying"
            );
            self.emit(QueueEvent::Retrying {
                queue: job.queue.clone(),
                job_id: job.id,
                reason,
                attempts_made: job.attempts_made,
                delay_ms: delay.as_millis() as u64,
            });
            return Ok(FailureOutcome::Retrying { delay });
        }

        job.status = JobStatus::Failed;
        job.finished_at = Some(now);
        let processing_ms = job.processing_time_ms();

        let entry = DeadLetterEntry {
            queue: job.queue.clone(),
            original_job_id: job.id,
            payload: job.payload.clone(),
            failure_reason: reason.clone(),
            attempts_made: job.attempts_made,
            failed_at: now,
            options: job.resubmit_options(),
        };
        let mut dead = self
            .build_job(
                &dead_letter_queue_name(&job.queue),
                serde_json::to_value(&entry)?,
                JobOptions::default().with_attempts(1),
            )
            .await?;
        dead.status = JobStatus::Failed;
        dead.finished_at = Some(now);
        dead.failed_reason = Some(reason.clone());
        let dead_letter_id = dead.id;
        self.broker.insert(dead).await?;

        if job.remove_on_fail {
            self.broker.remove(&job.queue, job.id).await?;
        } else {
            self.broker.update(job.clone()).await?;
        }
        self.broker
            .record_outcome(&job.queue, Outcome::Failed, processing_ms)
            .await?;

        metrics::counter!("queue_jobs_failed_total", "queue" => job.queue.clone()).increment(1);
        metrics::counter!("queue_jobs_dead_lettered_total", "queue" => job.queue.clone())
            .increment(1);
        tracing::error!(
            job_id = %job.id,
            queue = %job.queue,
            attempts_made = job.attempts_made,
            dead_letter_id = %dead_letter_id,
            error = %reason,
            "Job failed permanently, moved to dead-letter queue"
        );
        self.emit(QueueEvent::DeadLettered {
            queue: job.queue.clone(),
            job_id: job.id,
            dead_letter_id,
        });
        self.emit(QueueEvent::Failed {
            queue: job.queue.clone(),
            job_id: job.id,
            reason,
            attempts_made: job.attempts_made,
        });
        Ok(FailureOutcome::DeadLettered { dead_letter_id })
    }

    /// Move active jobs whose lease expired to `stalled`, where they are
    /// claimable again without consuming an attempt. A job stalling more than
    /// `max_stalled_count` times is failed instead.
    pub async fn recover_stalled_jobs(&self, queue: &str) -> Result<usize, QueueError> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut recovered = 0;

        for mut job in self.broker.list(queue).await? {
            let expired = job.status == JobStatus::Active
                && job.locked_until.map(|until| until <= now).unwrap_or(true);
            if !expired {
                continue;
            }
            job.stalled_count += 1;
            recovered += 1;
            tracing::warn!(job_id = %job.id, queue = %queue, stalled_count = job.stalled_count, "Job stalled");
            self.emit(QueueEvent::Stalled {
                queue: queue.to_string(),
                job_id: job.id,
            });

            if job.stalled_count > self.config.max_stalled_count {
                self.fail_attempt(job, STALLED_LIMIT_REASON.to_string(), false)
                    .await?;
                continue;
            }
            job.status = JobStatus::Stalled;
            job.lock_token = None;
            job.locked_until = None;
            job.progress = Progress::default();
            self.broker.update(job).await?;
        }
        Ok(recovered)
    }

    /// Move delayed jobs whose time has come to `waiting`.
    pub async fn promote_delayed_jobs(&self, queue: &str) -> Result<usize, QueueError> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut promoted = 0;
        for mut job in self.broker.list(queue).await? {
            if job.status == JobStatus::Delayed && job.ready_at <= now {
                job.status = JobStatus::Waiting;
                self.broker.update(job).await?;
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    pub async fn get_queue_metrics(&self, queue: &str) -> Result<QueueMetrics, QueueError> {
        let mut metrics = QueueMetrics {
            queue: queue.to_string(),
            paused: self.broker.is_paused(queue).await?,
            ..Default::default()
        };
        for job in self.broker.list(queue).await? {
            match job.status {
                JobStatus::Waiting => metrics.waiting += 1,
                JobStatus::Active => metrics.active += 1,
                JobStatus::Delayed => metrics.delayed += 1,
                JobStatus::Stalled => metrics.stalled += 1,
                JobStatus::Completed | JobStatus::Failed => {}
            }
        }
        if !is_dead_letter_queue(queue) {
            metrics.dead_letter = self
                .broker
                .list(&dead_letter_queue_name(queue))
                .await?
                .len() as u64;
        }

        let counters = self.broker.counters(queue).await?;
        metrics.completed = counters.completed;
        metrics.failed = counters.failed;
        let samples = &counters.processing_samples_ms;
        metrics.avg_processing_time_ms = (!samples.is_empty())
            .then(|| samples.iter().sum::<i64>() as f64 / samples.len() as f64);
        let finished = counters.completed + counters.failed;
        metrics.success_rate = if finished == 0 {
            100.0
        } else {
            counters.completed as f64 / finished as f64 * 100.0
        };
        Ok(metrics)
    }

    /// Metrics for every known queue except dead-letter queues.
    pub async fn get_all_metrics(&self) -> Result<Vec<QueueMetrics>, QueueError> {
        let mut all = Vec::new();
        for queue in self.broker.queue_names().await? {
            if !is_dead_letter_queue(&queue) {
                all.push(self.get_queue_metrics(&queue).await?);
            }
        }
        Ok(all)
    }

    pub async fn get_health_status(&self) -> Result<Vec<QueueHealth>, QueueError> {
        Ok(self
            .get_all_metrics()
            .await?
            .into_iter()
            .map(QueueHealth::from)
            .collect())
    }

    /// Enqueue `child_payload` on `child_queue` after the dependency delay,
    /// tagged with the parent reference. This orders by time only: the child
    /// does not wait for the parent to finish and is not cancelled if the
    /// parent fails.
    pub async fn create_job_dependency(
        &self,
        parent_id: JobId,
        parent_queue: &str,
        child_queue: &str,
        child_payload: serde_json::Value,
    ) -> Result<Job, QueueError> {
        Self::ensure_submittable(child_queue)?;
        self.require_job(parent_queue, parent_id).await?;

        let mut payload = child_payload;
        if let Some(object) = payload.as_object_mut() {
            object.insert("parentJobId".to_string(), serde_json::json!(parent_id));
            object.insert("parentQueue".to_string(), serde_json::json!(parent_queue));
        }
        let options =
            JobOptions::default().with_delay(self.config.dependency_delay);
        let mut job = self.build_job(child_queue, payload, options).await?;
        job.parent = Some(ParentRef {
            queue: parent_queue.to_string(),
            id: parent_id,
        });
        self.broker.insert(job.clone()).await?;
        tracing::info!(
            job_id = %job.id,
            queue = %child_queue,
            parent_id = %parent_id,
            parent_queue = %parent_queue,
            "Dependent job scheduled"
        );
        self.announce_added(&job);
        Ok(job)
    }

    /// Dead-letter entries for `queue`, oldest first.
    pub async fn get_dead_letters(&self, queue: &str) -> Result<Vec<DeadLetterEntry>, QueueError> {
        let mut jobs = self.broker.list(&dead_letter_queue_name(queue)).await?;
        jobs.sort_by_key(|j| j.sequence);
        jobs.into_iter()
            .map(|j| serde_json::from_value(j.payload).map_err(QueueError::from))
            .collect()
    }

    /// Re-enqueue up to `limit` dead-lettered payloads (0 = all) on their
    /// origin queue with their original options and a fresh attempt budget.
    /// Each entry is withdrawn before its job is added, so overlapping calls
    /// never requeue the same entry twice.
    pub async fn process_dead_letter_queue(
        &self,
        queue: &str,
        limit: usize,
    ) -> Result<Vec<Job>, QueueError> {
        Self::ensure_submittable(queue)?;
        let _guard = self.write_lock.lock().await;
        let dlq = dead_letter_queue_name(queue);
        let mut entries = self.broker.list(&dlq).await?;
        entries.sort_by_key(|j| j.sequence);
        if limit > 0 {
            entries.truncate(limit);
        }

        let mut requeued = Vec::with_capacity(entries.len());
        for listed in entries {
            let entry: DeadLetterEntry = serde_json::from_value(listed.payload)?;
            let Some(dead) = self.broker.remove(&dlq, listed.id).await? else {
                continue;
            };
            let job = match self.build_job(queue, entry.payload, entry.options).await {
                Ok(job) => job,
                Err(e) => {
                    self.broker.insert(dead).await?;
                    return Err(e);
                }
            };
            self.broker.insert(job.clone()).await?;
            tracing::info!(
                job_id = %job.id,
                original_job_id = %entry.original_job_id,
                queue = %queue,
                "Dead-letter entry reprocessed"
            );
            self.announce_added(&job);
            requeued.push(job);
        }
        Ok(requeued)
    }

    /// One maintenance pass over every non-dead-letter queue.
    pub async fn run_maintenance(&self) {
        let queues = match self.broker.queue_names().await {
            Ok(queues) => queues,
            Err(e) => {
                tracing::warn!(error = %e, "Maintenance could not list queues");
                return;
            }
        };
        for queue in queues.iter().filter(|q| !is_dead_letter_queue(q)) {
            if let Err(e) = self.promote_delayed_jobs(queue).await {
                tracing::warn!(queue = %queue, error = %e, "Delayed promotion failed");
            }
            if let Err(e) = self.recover_stalled_jobs(queue).await {
                tracing::warn!(queue = %queue, error = %e, "Stalled recovery failed");
            }
        }
    }

    /// Run [`run_maintenance`](Self::run_maintenance) every `interval` until
    /// `shutdown` flips.
    pub fn spawn_maintenance(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_maintenance().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Queue maintenance stopped");
        })
    }
}
