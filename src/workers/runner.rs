use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::PipelineError;
use crate::models::job::{Job, Progress};
use crate::queue::{FailureOutcome, QueueError, QueueService};

/// One kind of worker: what it consumes and how it processes a job.
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    fn queue_name(&self) -> &str;

    /// Hard timeout for jobs that do not set their own.
    fn default_timeout(&self) -> Duration;

    async fn process(
        &self,
        job: &Job,
        ctx: &JobContext,
    ) -> Result<serde_json::Value, PipelineError>;

    /// Release whatever a failed or abandoned attempt left behind.
    async fn cleanup(&self, _job: &Job) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Called once when the owning pool stops.
    async fn shutdown(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Handle a processor uses to report progress for the job it holds.
pub struct JobContext {
    queue: Arc<QueueService>,
    job: Job,
}

impl JobContext {
    pub fn new(queue: Arc<QueueService>, job: Job) -> Self {
        Self { queue, job }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Report progress. A rejected update is logged and otherwise ignored.
    pub async fn progress(
        &self,
        stage: impl std::fmt::Display + Send,
        progress: u8,
        message: impl Into<String> + Send,
    ) {
        self.report(Progress::new(stage.to_string(), progress, message))
            .await;
    }

    pub async fn report(&self, progress: Progress) {
        if let Err(e) = self.queue.update_job_progress(&self.job, progress).await {
            tracing::warn!(job_id = %self.job.id, queue = %self.job.queue, error = %e, "Progress update rejected");
        }
    }
}

/// How one processed job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    Failed {
        error: PipelineError,
        outcome: FailureOutcome,
    },
}

/// Process a claimed job: run it under its hard timeout while renewing the
/// lease, then complete it or route the failure (with the processor's
/// cleanup) through the queue.
pub async fn run_job<P: JobProcessor + ?Sized>(
    queue: &Arc<QueueService>,
    processor: &P,
    job: Job,
) -> Result<JobOutcome, QueueError> {
    let timeout = job.timeout().unwrap_or_else(|| processor.default_timeout());
    let ctx = JobContext::new(queue.clone(), job.clone());
    let renew_every = (queue.config().lock_duration / 2).max(Duration::from_millis(10));
    let mut renew = tokio::time::interval_at(Instant::now() + renew_every, renew_every);

    tracing::info!(job_id = %job.id, queue = %job.queue, attempt = job.attempts_made + 1, timeout_ms = timeout.as_millis() as u64, "Processing job");
    let work = tokio::time::timeout(timeout, processor.process(&job, &ctx));
    tokio::pin!(work);
    let result = loop {
        tokio::select! {
            res = &mut work => break res.unwrap_or(Err(PipelineError::Timeout(timeout))),
            _ = renew.tick() => {
                if let Err(e) = queue.extend_lock(&job).await {
                    tracing::warn!(job_id = %job.id, queue = %job.queue, error = %e, "Lock renewal failed");
                }
            }
        }
    };

    match result {
        Ok(value) => {
            queue.complete_job(&job, value).await?;
            Ok(JobOutcome::Completed)
        }
        Err(error) => {
            tracing::warn!(
                job_id = %job.id,
                queue = %job.queue,
                kind = error.kind(),
                error = %error,
                "Job attempt failed"
            );
            let outcome = queue
                .handle_job_failure(&job, &error, Some(processor.cleanup(&job)))
                .await?;
            Ok(JobOutcome::Failed { error, outcome })
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_millis(1000),
        }
    }
}

/// Fixed number of slots pulling from one queue. Each slot runs one job at
/// a time; slots run concurrently.
pub struct WorkerPool<P: JobProcessor> {
    queue: Arc<QueueService>,
    processor: Arc<P>,
    config: WorkerPoolConfig,
}

impl<P: JobProcessor> WorkerPool<P> {
    pub fn new(queue: Arc<QueueService>, processor: Arc<P>, config: WorkerPoolConfig) -> Self {
        Self {
            queue,
            processor,
            config,
        }
    }

    pub fn processor(&self) -> &Arc<P> {
        &self.processor
    }

    /// Claim and process a single job, if one is ready.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>, QueueError> {
        match self.queue.claim_job(self.processor.queue_name()).await? {
            Some(job) => run_job(&self.queue, self.processor.as_ref(), job)
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    async fn slot_loop(&self, slot: usize, mut shutdown: watch::Receiver<bool>) {
        let queue = self.processor.queue_name();
        tracing::info!(queue = %queue, slot, "Worker slot started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => tracing::trace!(queue = %queue, slot, "No jobs available"),
                Err(e) => tracing::error!(queue = %queue, slot, error = %e, "Worker slot error"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(queue = %queue, slot, "Worker slot stopped");
    }

    /// Start all slots. The returned task finishes after every slot has
    /// observed `shutdown` and the processor has been shut down.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let pool = Arc::new(self);
        tokio::spawn(async move {
            let slots: Vec<_> = (0..pool.config.concurrency.max(1))
                .map(|slot| {
                    let pool = pool.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move { pool.slot_loop(slot, shutdown).await })
                })
                .collect();
            for slot in slots {
                if let Err(e) = slot.await {
                    tracing::error!(error = %e, "Worker slot panicked");
                }
            }
            if let Err(e) = pool.processor.shutdown().await {
                tracing::warn!(queue = %pool.processor.queue_name(), error = %e, "Processor shutdown failed");
            }
            tracing::info!(queue = %pool.processor.queue_name(), "Worker pool stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{BackoffPolicy, JobOptions, JobStatus};
    use crate::queue::{InMemoryBroker, QueueConfig};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        calls: AtomicUsize,
        cleanups: AtomicUsize,
        fail_with: Option<PipelineError>,
        sleep: Duration,
    }

    impl Scripted {
        fn new(fail_with: Option<PipelineError>, sleep: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                cleanups: AtomicUsize::new(0),
                fail_with,
                sleep,
            }
        }
    }

    #[async_trait]
    impl JobProcessor for Scripted {
        fn queue_name(&self) -> &str {
            "scripted"
        }

        fn default_timeout(&self) -> Duration {
            Duration::from_millis(200)
        }

        async fn process(
            &self,
            job: &Job,
            ctx: &JobContext,
        ) -> Result<serde_json::Value, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.progress("working", 50, "half way").await;
            tokio::time::sleep(self.sleep).await;
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => Ok(json!({"echo": job.payload})),
            }
        }

        async fn cleanup(&self, _job: &Job) -> Result<(), PipelineError> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn queue() -> Arc<QueueService> {
        Arc::new(QueueService::new(
            Arc::new(InMemoryBroker::new()),
            QueueConfig {
                default_backoff: BackoffPolicy::Fixed { delay_ms: 0 },
                ..Default::default()
            },
        ))
    }

    #[tokio::test]
    async fn test_successful_job_completes() {
        let queue = queue();
        let pool = WorkerPool::new(
            queue.clone(),
            Arc::new(Scripted::new(None, Duration::ZERO)),
            WorkerPoolConfig::default(),
        );
        let job = queue
            .add_job("scripted", json!({"n": 1}), JobOptions::default())
            .await
            .unwrap();

        assert_eq!(pool.run_once().await.unwrap(), Some(JobOutcome::Completed));
        let stored = queue.get_job("scripted", job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.return_value, Some(json!({"echo": {"n": 1}})));
        assert_eq!(stored.progress.progress, 50);
        assert_eq!(pool.run_once().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_processing_error_exhausts_attempts() {
        let queue = queue();
        let processor = Arc::new(Scripted::new(
            Some(PipelineError::Processing("engine crashed".into())),
            Duration::ZERO,
        ));
        let pool = WorkerPool::new(queue.clone(), processor.clone(), WorkerPoolConfig::default());
        queue
            .add_job("scripted", json!({}), JobOptions::default().with_attempts(3))
            .await
            .unwrap();

        let mut outcomes = Vec::new();
        while let Some(outcome) = pool.run_once().await.unwrap() {
            outcomes.push(outcome);
        }
        assert_eq!(outcomes.len(), 3);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 3);
        assert_eq!(processor.cleanups.load(Ordering::SeqCst), 3);
        assert!(matches!(
            outcomes.last(),
            Some(JobOutcome::Failed {
                outcome: FailureOutcome::DeadLettered { .. },
                ..
            })
        ));
        let dead = queue.get_dead_letters("scripted").await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts_made, 3);
    }

    #[tokio::test]
    async fn test_timeout_fails_attempt() {
        let queue = queue();
        let processor = Arc::new(Scripted::new(None, Duration::from_secs(5)));
        let pool = WorkerPool::new(queue.clone(), processor.clone(), WorkerPoolConfig::default());
        queue
            .add_job(
                "scripted",
                json!({}),
                JobOptions::default()
                    .with_attempts(1)
                    .with_timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap();

        let outcome = pool.run_once().await.unwrap().unwrap();
        match outcome {
            JobOutcome::Failed { error, .. } => {
                assert_eq!(error, PipelineError::Timeout(Duration::from_millis(50)))
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(processor.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pool_stops_on_shutdown() {
        let queue = queue();
        let pool = WorkerPool::new(
            queue.clone(),
            Arc::new(Scripted::new(None, Duration::ZERO)),
            WorkerPoolConfig {
                concurrency: 3,
                poll_interval: Duration::from_millis(10),
            },
        );
        let mut events = queue.subscribe();
        let (tx, rx) = watch::channel(false);
        let handle = pool.spawn(rx);

        queue
            .add_job("scripted", json!({}), JobOptions::default())
            .await
            .unwrap();
        loop {
            if let crate::queue::QueueEvent::Completed { .. } = events.recv().await.unwrap() {
                break;
            }
        }

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
