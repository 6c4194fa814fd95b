use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use image::GrayImage;

use super::image_loader::LoadedImage;
use super::lifecycle::Lifecycle;
use crate::geometry::components::{label_components, Component, Connectivity};
use crate::geometry::contours::{binarize, Foreground};
use crate::models::vision::{DetectedObject, ObjectCategory, ObjectDetection, ObjectDetectorStats, ObjectSettings};
use crate::workers::PipelineError;

/// Finds fixtures, furniture and appliances drawn on a plan.
#[async_trait]
pub trait ObjectDetector: Lifecycle {
    async fn detect_objects(
        &self,
        image: &LoadedImage,
        settings: &ObjectSettings,
    ) -> Result<ObjectDetection, PipelineError>;

    fn get_stats(&self) -> ObjectDetectorStats;
}

/// Dark blobs too small to be walls, sorted into categories by size and
/// shape: small blobs are fixtures, roughly square ones appliances, the
/// rest furniture.
#[derive(Debug, Default)]
pub struct BlobObjectDetector {
    initialized: AtomicBool,
    images_processed: AtomicU64,
    objects_detected: AtomicU64,
}

impl BlobObjectDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

fn categorize(component: &Component, settings: &ObjectSettings) -> ObjectCategory {
    let aspect = component.bounding_box.aspect_ratio();
    if component.area < settings.fixture_max_area {
        ObjectCategory::Fixture
    } else if (0.8..=1.25).contains(&aspect) {
        ObjectCategory::Appliance
    } else {
        ObjectCategory::Furniture
    }
}

pub fn detect(gray: &GrayImage, settings: &ObjectSettings) -> Vec<DetectedObject> {
    let ink = binarize(gray, settings.threshold, Foreground::Dark);
    let map = label_components(&ink, Connectivity::Eight);

    map.components
        .iter()
        .filter(|c| (settings.min_area..=settings.max_area).contains(&c.area))
        .filter(|c| {
            c.bounding_box.width <= settings.max_dimension
                && c.bounding_box.height <= settings.max_dimension
        })
        .enumerate()
        .map(|(i, c)| DetectedObject {
            id: format!("object-{}", i + 1),
            category: categorize(c, settings),
            bounding_box: c.bounding_box,
            area: c.area as f64,
            confidence: (c.area as f64 / c.bounding_box.area().max(1.0)).clamp(0.0, 1.0),
        })
        .collect()
}

#[async_trait]
impl Lifecycle for BlobObjectDetector {
    fn name(&self) -> &str {
        "blob-object-detector"
    }

    async fn initialize(&self) -> Result<(), PipelineError> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), PipelineError> {
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ObjectDetector for BlobObjectDetector {
    async fn detect_objects(
        &self,
        image: &LoadedImage,
        settings: &ObjectSettings,
    ) -> Result<ObjectDetection, PipelineError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(PipelineError::Processing(
                "Object detector used before initialization".to_string(),
            ));
        }
        let gray = image.gray.clone();
        let settings = settings.clone();
        let objects = tokio::task::spawn_blocking(move || detect(&gray, &settings)).await?;

        self.images_processed.fetch_add(1, Ordering::Relaxed);
        self.objects_detected
            .fetch_add(objects.len() as u64, Ordering::Relaxed);
        Ok(ObjectDetection::from_objects(objects))
    }

    fn get_stats(&self) -> ObjectDetectorStats {
        ObjectDetectorStats {
            initialized: self.initialized.load(Ordering::SeqCst),
            images_processed: self.images_processed.load(Ordering::Relaxed),
            objects_detected: self.objects_detected.load(Ordering::Relaxed),
        }
    }
}
