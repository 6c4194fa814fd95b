use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use garde::Validate;
use serde_json::json;
use tokio::time::Instant;

use super::runner::{JobContext, JobProcessor};
use super::PipelineError;
use crate::geometry::{detect_contours, detect_edges, detect_lines};
use crate::models::job::Job;
use crate::models::vision::{
    AnalysisMetadata, AnalysisType, CombinedView, VisionAnalysis, VisionJobPayload,
    VisionOutputFormat, VisionSettings, VisionStage,
};
use crate::services::{
    sweep_job_workspaces, ImageLimits, ImageLoader, LoadedImage, ManagedEngine, ObjectDetector,
    RoomDetector, TempWorkspace,
};

pub const VISION_QUEUE: &str = "vision";

/// Order and cumulative progress of the stages of a full analysis.
const FULL_SEQUENCE: [(AnalysisType, VisionStage, u8); 5] = [
    (AnalysisType::Edges, VisionStage::Edges, 15),
    (AnalysisType::Lines, VisionStage::Lines, 30),
    (AnalysisType::Contours, VisionStage::Contours, 45),
    (AnalysisType::Rooms, VisionStage::Rooms, 70),
    (AnalysisType::Objects, VisionStage::Objects, 95),
];

const COMBINING_PROGRESS: u8 = 100;
const FORMATTING_PROGRESS: u8 = 95;

/// Progress reported when formatting starts; never below what the analysis
/// already reported.
fn formatting_progress(kind: AnalysisType) -> u8 {
    match kind {
        AnalysisType::Full => COMBINING_PROGRESS,
        _ => FORMATTING_PROGRESS,
    }
}

#[derive(Debug, Clone)]
pub struct VisionWorkerConfig {
    pub temp_root: PathBuf,
    pub timeout: Duration,
    pub limits: ImageLimits,
}

impl Default for VisionWorkerConfig {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir().join("floorplan-vision"),
            timeout: Duration::from_secs(180),
            limits: ImageLimits::default(),
        }
    }
}

/// Geometric analysis of floor-plan images, one strategy per
/// [`AnalysisType`].
pub struct VisionWorker {
    rooms: Arc<dyn RoomDetector>,
    objects: ManagedEngine<dyn ObjectDetector>,
    loader: ImageLoader,
    config: VisionWorkerConfig,
}

fn stage_for(kind: AnalysisType) -> VisionStage {
    match kind {
        AnalysisType::Edges => VisionStage::Edges,
        AnalysisType::Lines => VisionStage::Lines,
        AnalysisType::Contours => VisionStage::Contours,
        AnalysisType::Rooms => VisionStage::Rooms,
        AnalysisType::Objects => VisionStage::Objects,
        AnalysisType::Full => VisionStage::Combining,
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, PipelineError> {
    serde_json::to_value(value).map_err(|e| PipelineError::Processing(e.to_string()))
}

/// Shape an analysis per the requested output format.
pub fn format_output(
    kind: AnalysisType,
    analysis: &VisionAnalysis,
    combined: Option<&CombinedView>,
    metadata: &AnalysisMetadata,
    format: VisionOutputFormat,
) -> Result<serde_json::Value, PipelineError> {
    let value = match format {
        VisionOutputFormat::Simplified => {
            let counts = &metadata.detection_counts;
            let has = |key: &str| counts.get(key).copied().unwrap_or(0) > 0;
            json!({
                "analysisType": kind,
                "counts": counts,
                "hasEdges": has("edgePixels"),
                "hasLines": has("lines"),
                "hasRooms": has("rooms"),
                "hasWalls": has("walls"),
                "hasDoors": has("doors"),
                "hasWindows": has("windows"),
                "hasObjects": has("objects"),
                "metadata": to_value(metadata)?,
            })
        }
        VisionOutputFormat::Detailed => {
            let combined = match combined {
                Some(view) => view.clone(),
                None => CombinedView::from_analysis(analysis),
            };
            json!({
                "analysisType": kind,
                "raw": to_value(analysis)?,
                "combined": to_value(&combined)?,
                "metadata": to_value(metadata)?,
            })
        }
        VisionOutputFormat::Json => {
            let mut value = to_value(analysis)?;
            value["analysisType"] = json!(kind);
            if let Some(view) = combined {
                value["combined"] = to_value(view)?;
            }
            value["metadata"] = to_value(metadata)?;
            value
        }
    };
    Ok(value)
}

impl VisionWorker {
    pub fn new(
        rooms: Arc<dyn RoomDetector>,
        objects: Arc<dyn ObjectDetector>,
        config: VisionWorkerConfig,
    ) -> Self {
        Self {
            rooms,
            objects: ManagedEngine::new(objects),
            loader: ImageLoader::new(config.limits),
            config,
        }
    }

    pub fn config(&self) -> &VisionWorkerConfig {
        &self.config
    }

    pub fn object_detector(&self) -> &ManagedEngine<dyn ObjectDetector> {
        &self.objects
    }

    /// Run one non-composite strategy and store its result in `analysis`.
    async fn run_strategy(
        &self,
        kind: AnalysisType,
        image: &LoadedImage,
        settings: &VisionSettings,
        analysis: &mut VisionAnalysis,
    ) -> Result<(), PipelineError> {
        match kind {
            AnalysisType::Edges => {
                let (gray, edges) = (image.gray.clone(), settings.edges.clone());
                analysis.edges = Some(
                    tokio::task::spawn_blocking(move || detect_edges(&gray, &edges).summary())
                        .await?,
                );
            }
            AnalysisType::Lines => {
                let (gray, lines) = (image.gray.clone(), settings.lines.clone());
                analysis.lines =
                    Some(tokio::task::spawn_blocking(move || detect_lines(&gray, &lines)).await?);
            }
            AnalysisType::Contours => {
                let (gray, contours) = (image.gray.clone(), settings.contours.clone());
                analysis.contours = Some(
                    tokio::task::spawn_blocking(move || detect_contours(&gray, &contours))
                        .await?,
                );
            }
            AnalysisType::Rooms => {
                analysis.rooms = Some(self.rooms.detect_rooms(image, &settings.rooms).await?);
            }
            AnalysisType::Objects => {
                let detector = self.objects.acquire().await?;
                analysis.objects = Some(detector.detect_objects(image, &settings.objects).await?);
            }
            AnalysisType::Full => {
                return Err(PipelineError::Processing(
                    "Full analysis is composed from the other strategies".to_string(),
                ))
            }
        }
        Ok(())
    }

    async fn analyze(
        &self,
        image: &LoadedImage,
        settings: &VisionSettings,
        ctx: &JobContext,
    ) -> Result<(VisionAnalysis, Option<CombinedView>), PipelineError> {
        let mut analysis = VisionAnalysis::default();
        let kind = settings.analysis_type;
        if kind != AnalysisType::Full {
            ctx.progress(stage_for(kind), 20, format!("Running {kind} analysis"))
                .await;
            self.run_strategy(kind, image, settings, &mut analysis).await?;
            return Ok((analysis, None));
        }

        for (step, stage, done) in FULL_SEQUENCE {
            self.run_strategy(step, image, settings, &mut analysis).await?;
            ctx.progress(stage, done, format!("{step} analysis complete"))
                .await;
        }
        ctx.progress(VisionStage::Combining, COMBINING_PROGRESS, "Combining results")
            .await;
        let combined = CombinedView::from_analysis(&analysis);
        Ok((analysis, Some(combined)))
    }

    async fn pipeline(
        &self,
        ctx: &JobContext,
        payload: &VisionJobPayload,
        workspace: &TempWorkspace,
        started: Instant,
    ) -> Result<serde_json::Value, PipelineError> {
        let bytes = self.loader.fetch(&payload.image, workspace).await?;
        ctx.progress(VisionStage::Validating, 0, "Validating image").await;
        self.loader.validate(&bytes)?;
        let image = ImageLoader::decode(bytes).await?;

        let (analysis, combined) = self.analyze(&image, &payload.settings, ctx).await?;

        ctx.progress(
            VisionStage::Formatting,
            formatting_progress(payload.settings.analysis_type),
            "Formatting output",
        ).await;
        let metadata = AnalysisMetadata {
            processing_time: started.elapsed().as_millis() as u64,
            image_size: image.size,
            detection_counts: analysis.detection_counts(),
        };
        tracing::debug!(
            job_id = %ctx.job().id,
            analysis_type = %payload.settings.analysis_type,
            counts = ?metadata.detection_counts,
            "Vision analysis finished"
        );
        format_output(
            payload.settings.analysis_type,
            &analysis,
            combined.as_ref(),
            &metadata,
            payload.settings.output_format,
        )
    }
}

pub fn parse_payload(job: &Job) -> Result<VisionJobPayload, PipelineError> {
    let payload: VisionJobPayload = serde_json::from_value(job.payload.clone())
        .map_err(|e| PipelineError::Validation(format!("Invalid vision payload: {e}")))?;
    let settings = &payload.settings;
    settings
        .validate()
        .map_err(|report| PipelineError::Validation(report.to_string()))?;
    if settings.rooms.door_max_width < settings.rooms.door_min_width {
        return Err(PipelineError::Validation(
            "rooms.doorMaxWidth must not be below rooms.doorMinWidth".to_string(),
        ));
    }
    if settings.objects.max_area < settings.objects.min_area {
        return Err(PipelineError::Validation(
            "objects.maxArea must not be below objects.minArea".to_string(),
        ));
    }
    Ok(payload)
}

#[async_trait]
impl JobProcessor for VisionWorker {
    fn queue_name(&self) -> &str {
        VISION_QUEUE
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
        ctx.progress(VisionStage::Starting, 0, "Starting analysis").await;
        let payload = parse_payload(job)?;
        tracing::debug!(job_id = %job.id, source = payload.image.kind(), analysis_type = %payload.settings.analysis_type, "Vision job started");

        let workspace = TempWorkspace::create(&self.config.temp_root, job.id)?;
        let result = self.pipeline(ctx, &payload, &workspace, started).await;
        if let Err(e) = workspace.close().await {
            tracing::warn!(job_id = %job.id, error = %e, "Temp workspace cleanup failed");
        }

        if result.is_ok() {
            ctx.progress(VisionStage::Completed, 100, "Analysis completed").await;
        }
        result
    }

    async fn cleanup(&self, job: &Job) -> Result<(), PipelineError> {
        let removed = sweep_job_workspaces(&self.config.temp_root, job.id).await?;
        if removed > 0 {
            tracing::debug!(job_id = %job.id, removed, "Leftover vision workspaces removed");
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), PipelineError> {
        self.objects.shutdown().await
    }
}
