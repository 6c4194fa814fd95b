//! Job processors for the `ocr` and `vision` queues and the pool that runs them.

pub mod error;
pub mod ocr;
pub mod runner;
pub mod vision;

pub use error::PipelineError;
pub use ocr::{OcrWorker, OcrWorkerConfig, OCR_QUEUE};
pub use runner::{run_job, JobContext, JobOutcome, JobProcessor, WorkerPool, WorkerPoolConfig};
pub use vision::{VisionWorker, VisionWorkerConfig, VISION_QUEUE};
