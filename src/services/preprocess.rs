use async_trait::async_trait;

use super::image_loader::LoadedImage;
use super::temp::TempWorkspace;
use crate::geometry::buffer::{median_filter, stretch_contrast};
use crate::workers::PipelineError;

/// Cleans an image up before recognition. Implementations may write
/// intermediate files, but only inside the supplied workspace.
#[async_trait]
pub trait Preprocessor: Send + Sync {
    async fn preprocess(
        &self,
        image: &LoadedImage,
        workspace: &TempWorkspace,
    ) -> Result<LoadedImage, PipelineError>;
}

/// Contrast stretch followed by a 3x3 median denoise.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContrastPreprocessor;

const OUTPUT_FILE: &str = "preprocessed.png";

#[async_trait]
impl Preprocessor for ContrastPreprocessor {
    async fn preprocess(
        &self,
        image: &LoadedImage,
        workspace: &TempWorkspace,
    ) -> Result<LoadedImage, PipelineError> {
        let gray = image.gray.clone();
        let cleaned = tokio::task::spawn_blocking(move || {
            LoadedImage::from_gray(median_filter(&stretch_contrast(&gray)))
        })
        .await??;
        workspace.write(OUTPUT_FILE, &cleaned.bytes).await?;
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobId;
    use image::{GrayImage, Luma};

    #[tokio::test]
    async fn test_contrast_is_stretched_and_file_written() {
        let root = tempfile::tempdir().unwrap();
        let ws = TempWorkspace::create(root.path(), JobId::new()).unwrap();
        let gray = GrayImage::from_fn(20, 20, |x, _| if x < 10 { Luma([100]) } else { Luma([150]) });
        let image = LoadedImage::from_gray(gray).unwrap();

        let out = ContrastPreprocessor.preprocess(&image, &ws).await.unwrap();
        assert_eq!(out.gray.get_pixel(2, 10).0[0], 0);
        assert_eq!(out.gray.get_pixel(17, 10).0[0], 255);
        assert!(ws.file(OUTPUT_FILE).exists());
    }
}
