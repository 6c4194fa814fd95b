//! Stub collaborators and polling helpers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use floorplan_pipeline::models::job::{BackoffPolicy, Job, JobId};
use floorplan_pipeline::models::ocr::{OcrOptions, OcrResult};
use floorplan_pipeline::queue::{InMemoryBroker, QueueConfig, QueueEvent, QueueService};
use floorplan_pipeline::services::ocr::transcription_to_result;
use floorplan_pipeline::services::{Lifecycle, OcrEngine};
use floorplan_pipeline::workers::{JobContext, JobProcessor, PipelineError};

/// Queue service over the in-memory broker with millisecond backoff so retry
/// paths finish quickly.
pub fn test_queue() -> Arc<QueueService> {
    Arc::new(QueueService::new(
        Arc::new(InMemoryBroker::new()),
        QueueConfig {
            default_backoff: BackoffPolicy::Fixed { delay_ms: 1 },
            ..QueueConfig::default()
        },
    ))
}

/// OCR engine that "reads" the same messy transcription from any image.
pub struct ScriptedOcrEngine {
    pub text: String,
    pub calls: AtomicUsize,
}

impl ScriptedOcrEngine {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Lifecycle for ScriptedOcrEngine {
    fn name(&self) -> &str {
        "scripted-ocr"
    }
}

#[async_trait]
impl OcrEngine for ScriptedOcrEngine {
    async fn process_image(
        &self,
        image: &[u8],
        _options: &OcrOptions,
    ) -> Result<OcrResult, PipelineError> {
        image::load_from_memory(image)
            .map_err(|e| PipelineError::Processing(format!("Stub engine got an undecodable crop: {e}")))?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(transcription_to_result(&self.text, 91.0))
    }
}

/// OCR engine that keeps every image it is handed, decoded to grayscale.
#[derive(Default)]
pub struct RecordingOcrEngine {
    pub seen: std::sync::Mutex<Vec<image::GrayImage>>,
}

impl RecordingOcrEngine {
    pub fn seen(&self) -> Vec<image::GrayImage> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Lifecycle for RecordingOcrEngine {
    fn name(&self) -> &str {
        "recording-ocr"
    }
}

#[async_trait]
impl OcrEngine for RecordingOcrEngine {
    async fn process_image(
        &self,
        image: &[u8],
        _options: &OcrOptions,
    ) -> Result<OcrResult, PipelineError> {
        let gray = image::load_from_memory(image)
            .map_err(|e| PipelineError::Processing(e.to_string()))?
            .to_luma8();
        self.seen.lock().unwrap().push(gray);
        Ok(transcription_to_result("kitchen", 90.0))
    }
}

/// Processor whose every attempt fails with a retryable processing error.
pub struct AlwaysFails {
    pub queue: String,
    pub attempts_seen: AtomicUsize,
}

#[async_trait]
impl JobProcessor for AlwaysFails {
    fn queue_name(&self) -> &str {
        &self.queue
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn process(&self, _job: &Job, _ctx: &JobContext) -> Result<Value, PipelineError> {
        self.attempts_seen.fetch_add(1, Ordering::SeqCst);
        Err(PipelineError::Processing("engine exploded".to_string()))
    }
}

/// Processor that never finishes within any reasonable timeout.
pub struct Hangs {
    pub queue: String,
}

#[async_trait]
impl JobProcessor for Hangs {
    fn queue_name(&self) -> &str {
        &self.queue
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_millis(50)
    }

    async fn process(&self, _job: &Job, _ctx: &JobContext) -> Result<Value, PipelineError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Value::Null)
    }
}

/// Wait for the terminal `completed` or `failed` event of `job_id`.
pub async fn wait_for_terminal(
    events: &mut broadcast::Receiver<QueueEvent>,
    job_id: JobId,
    within: Duration,
) -> QueueEvent {
    tokio::time::timeout(within, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let terminal = match &event {
                        QueueEvent::Completed { job_id: id, .. }
                        | QueueEvent::Failed { job_id: id, .. } => *id == job_id,
                        _ => false,
                    };
                    if terminal {
                        return event;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("job did not reach a terminal state in time")
}

/// Number of entries left under a temp root (0 when it does not exist).
pub fn temp_entries(root: &Path) -> usize {
    std::fs::read_dir(root).map(|dir| dir.count()).unwrap_or(0)
}
