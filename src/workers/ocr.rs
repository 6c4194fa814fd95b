use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use garde::Validate;
use serde_json::json;
use tokio::time::Instant;

use super::runner::{JobContext, JobProcessor};
use super::PipelineError;
use crate::models::job::Job;
use crate::models::ocr::{
    FloorPlanText, OcrJobPayload, OcrOptions, OcrOutput, OcrOutputFormat, OcrResult, OcrSettings,
    OcrStage, RegionResult, RegionText,
};
use crate::services::{
    sweep_job_workspaces, ImageLimits, ImageLoader, LoadedImage, ManagedEngine, OcrEngine,
    Preprocessor, ResultCache, TempWorkspace, TextParser,
};

pub const OCR_QUEUE: &str = "ocr";

#[derive(Debug, Clone)]
pub struct OcrWorkerConfig {
    pub temp_root: PathBuf,
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub limits: ImageLimits,
}

impl Default for OcrWorkerConfig {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir().join("floorplan-ocr"),
            timeout: Duration::from_secs(120),
            cache_ttl: Duration::from_secs(3600),
            limits: ImageLimits::default(),
        }
    }
}

/// Text extraction: fetch, validate, optionally preprocess, recognize (whole
/// image or per region), parse floor-plan annotations, cache, format.
pub struct OcrWorker {
    engine: ManagedEngine<dyn OcrEngine>,
    preprocessor: Arc<dyn Preprocessor>,
    parser: Arc<dyn TextParser>,
    cache: Arc<dyn ResultCache>,
    loader: ImageLoader,
    config: OcrWorkerConfig,
}

/// Collapse runs of whitespace and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Merge per-region results: texts joined by newline, mean confidence,
/// concatenated words and lines, and one labeled entry per region.
pub fn combine_regions(results: Vec<RegionResult>) -> (OcrResult, Vec<RegionText>) {
    let count = results.len();
    let mut combined = OcrResult::default();
    let mut texts = Vec::with_capacity(count);
    let mut regions = Vec::with_capacity(count);
    let mut confidence_sum = 0.0;

    for RegionResult { region, result } in results {
        confidence_sum += result.confidence;
        texts.push(result.text.trim().to_string());
        regions.push(RegionText {
            label: region.label,
            text: normalize_whitespace(&result.text),
            confidence: result.confidence,
        });
        combined.words.extend(result.words);
        combined.lines.extend(result.lines);
    }

    combined.text = texts.join("\n");
    combined.confidence = if count == 0 {
        0.0
    } else {
        confidence_sum / count as f64
    };
    (combined, regions)
}

/// Shape an [`OcrOutput`] per the requested output format.
pub fn format_output(output: OcrOutput, format: OcrOutputFormat) -> Result<serde_json::Value, PipelineError> {
    let value = match format {
        OcrOutputFormat::Text => json!({
            "text": output.text,
            "confidence": output.confidence,
            "processingTime": output.processing_time,
        }),
        OcrOutputFormat::Structured => {
            let mut value = json!({
                "text": output.text,
                "confidence": output.confidence,
                "structuredData": output.structured_data,
                "processingTime": output.processing_time,
            });
            if let Some(regions) = output.regions {
                value["regions"] = serde_json::to_value(regions)
                    .map_err(|e| PipelineError::Processing(e.to_string()))?;
            }
            value
        }
        OcrOutputFormat::Json => serde_json::to_value(&output)
            .map_err(|e| PipelineError::Processing(e.to_string()))?,
    };
    Ok(value)
}

impl OcrWorker {
    pub fn new(
        engine: Arc<dyn OcrEngine>,
        preprocessor: Arc<dyn Preprocessor>,
        parser: Arc<dyn TextParser>,
        cache: Arc<dyn ResultCache>,
        config: OcrWorkerConfig,
    ) -> Self {
        Self {
            engine: ManagedEngine::new(engine),
            preprocessor,
            parser,
            cache,
            loader: ImageLoader::new(config.limits),
            config,
        }
    }

    pub fn config(&self) -> &OcrWorkerConfig {
        &self.config
    }

    pub fn cache_key(job: &Job) -> String {
        format!("{OCR_QUEUE}:{}", job.id)
    }

    async fn load(
        &self,
        payload: &OcrJobPayload,
        ctx: &JobContext,
        workspace: &TempWorkspace,
    ) -> Result<LoadedImage, PipelineError> {
        let bytes = self.loader.fetch(&payload.image, workspace).await?;
        ctx.progress(OcrStage::Validating, 10, "Validating image").await;
        self.loader.validate(&bytes)?;
        let image = ImageLoader::decode(bytes).await?;

        if !payload.settings.preprocess {
            return Ok(image);
        }
        ctx.progress(OcrStage::Preprocessing, 20, "Preprocessing image").await;
        match self.preprocessor.preprocess(&image, workspace).await {
            Ok(cleaned) => Ok(cleaned),
            Err(e) => {
                tracing::warn!(job_id = %ctx.job().id, error = %e, "Preprocessing failed, using original image");
                Ok(image)
            }
        }
    }

    async fn recognize(
        &self,
        image: &LoadedImage,
        settings: &OcrSettings,
    ) -> Result<(OcrResult, Option<Vec<RegionText>>), PipelineError> {
        let engine = self.engine.acquire().await?;
        let options = OcrOptions {
            language: settings.language.clone(),
        };
        if settings.regions.is_empty() {
            return Ok((engine.process_image(&image.bytes, &options).await?, None));
        }
        let results = engine
            .process_image_regions(&image.bytes, &settings.regions, &options)
            .await?;
        let (combined, regions) = combine_regions(results);
        Ok((combined, Some(regions)))
    }

    async fn parse(&self, job: &Job, text: &str, settings: &OcrSettings) -> Option<FloorPlanText> {
        match self
            .parser
            .parse_floor_plan_text(text, settings.hints.as_ref())
            .await
        {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Floor-plan text parsing failed");
                None
            }
        }
    }

    async fn pipeline(
        &self,
        job: &Job,
        ctx: &JobContext,
        payload: &OcrJobPayload,
        workspace: &TempWorkspace,
        started: Instant,
    ) -> Result<serde_json::Value, PipelineError> {
        let image = self.load(payload, ctx, workspace).await?;

        ctx.progress(OcrStage::Recognizing, 40, "Recognizing text").await;
        let (result, regions) = self.recognize(&image, &payload.settings).await?;
        tracing::debug!(job_id = %job.id, chars = result.text.len(), confidence = result.confidence, "Text recognized");

        ctx.progress(OcrStage::Parsing, 70, "Parsing floor-plan text").await;
        let structured_data = self.parse(job, &result.text, &payload.settings).await;

        ctx.progress(OcrStage::Caching, 85, "Caching result").await;
        let cached = json!({
            "text": result.text,
            "confidence": result.confidence,
            "structuredData": structured_data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self
            .cache
            .set(&Self::cache_key(job), &cached, self.config.cache_ttl)
            .await
        {
            tracing::warn!(job_id = %job.id, error = %e, "Result caching failed");
        }

        ctx.progress(OcrStage::Formatting, 95, "Formatting output").await;
        let output = OcrOutput {
            text: result.text,
            confidence: result.confidence,
            words: result.words,
            lines: result.lines,
            regions,
            structured_data,
            processing_time: started.elapsed().as_millis() as u64,
        };
        format_output(output, payload.settings.output_format)
    }
}

pub fn parse_payload(job: &Job) -> Result<OcrJobPayload, PipelineError> {
    let payload: OcrJobPayload = serde_json::from_value(job.payload.clone())
        .map_err(|e| PipelineError::Validation(format!("Invalid OCR payload: {e}")))?;
    payload
        .settings
        .validate()
        .map_err(|report| PipelineError::Validation(report.to_string()))?;
    Ok(payload)
}

#[async_trait]
impl JobProcessor for OcrWorker {
    fn queue_name(&self) -> &str {
        OCR_QUEUE
    }

    fn default_timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn process(
        &self,
        job: &Job,
        ctx: &JobContext,
    ) -> Result<serde_json::Value, PipelineError> {
        let started = Instant::now();
        ctx.progress(OcrStage::Starting, 0, "Starting OCR").await;
        let payload = parse_payload(job)?;
        tracing::debug!(job_id = %job.id, source = payload.image.kind(), regions = payload.settings.regions.len(), "OCR job started");

        let workspace = TempWorkspace::create(&self.config.temp_root, job.id)?;
        let result = self.pipeline(job, ctx, &payload, &workspace, started).await;
        if let Err(e) = workspace.close().await {
            tracing::warn!(job_id = %job.id, error = %e, "Temp workspace cleanup failed");
        }

        if result.is_ok() {
            ctx.progress(OcrStage::Completed, 100, "OCR completed").await;
        }
        result
    }

    async fn cleanup(&self, job: &Job) -> Result<(), PipelineError> {
        let removed = sweep_job_workspaces(&self.config.temp_root, job.id).await?;
        if removed > 0 {
            tracing::debug!(job_id = %job.id, removed, "Leftover OCR workspaces removed");
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), PipelineError> {
        self.engine.shutdown().await
    }
}
