use std::io::Cursor;

use async_trait::async_trait;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use reqwest::Client;
use serde::Deserialize;

use super::lifecycle::Lifecycle;
use crate::models::geometry::BoundingBox;
use crate::models::image::{ImageSize, Region};
use crate::models::ocr::{OcrLine, OcrOptions, OcrResult, OcrWord, RegionResult};
use crate::workers::PipelineError;

/// A text-recognition engine.
///
/// `process_image_regions` defaults to cropping each region out of the
/// image and running [`process_image`](Self::process_image) on the crop;
/// word and line boxes are shifted back into whole-image coordinates.
/// Regions that fall entirely outside the image yield an empty result.
#[async_trait]
pub trait OcrEngine: Lifecycle {
    async fn process_image(
        &self,
        image: &[u8],
        options: &OcrOptions,
    ) -> Result<OcrResult, PipelineError>;

    async fn process_image_regions(
        &self,
        image: &[u8],
        regions: &[Region],
        options: &OcrOptions,
    ) -> Result<Vec<RegionResult>, PipelineError> {
        let crops = crop_regions(image.to_vec(), regions.to_vec()).await?;
        let mut results = Vec::with_capacity(regions.len());
        for (region, crop) in regions.iter().zip(crops) {
            let result = match crop {
                Some(bytes) => {
                    let result = self.process_image(&bytes, options).await?;
                    offset_result(result, region.x as f64, region.y as f64)
                }
                None => OcrResult::default(),
            };
            results.push(RegionResult {
                region: region.clone(),
                result,
            });
        }
        Ok(results)
    }
}

/// PNG-encoded crops, one per region; `None` where the region misses the image.
async fn crop_regions(
    image: Vec<u8>,
    regions: Vec<Region>,
) -> Result<Vec<Option<Vec<u8>>>, PipelineError> {
    tokio::task::spawn_blocking(move || -> Result<Vec<Option<Vec<u8>>>, PipelineError> {
        let decoded = image::load_from_memory(&image)?;
        let size = ImageSize {
            width: decoded.width(),
            height: decoded.height(),
        };
        regions
            .iter()
            .map(|region| {
                region
                    .clamp_to(size)
                    .map(|(x, y, w, h)| encode_png(&decoded.crop_imm(x, y, w, h)))
                    .transpose()
            })
            .collect()
    })
    .await?
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, PipelineError> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| PipelineError::Processing(format!("PNG encoding failed: {e}")))?;
    Ok(bytes)
}

fn shift(bbox: BoundingBox, dx: f64, dy: f64) -> BoundingBox {
    BoundingBox::new(bbox.x + dx, bbox.y + dy, bbox.width, bbox.height)
}

fn offset_result(mut result: OcrResult, dx: f64, dy: f64) -> OcrResult {
    for word in &mut result.words {
        word.bbox = shift(word.bbox, dx, dy);
    }
    for line in &mut result.lines {
        line.bbox = shift(line.bbox, dx, dy);
    }
    result
}

/// Confidence reported for model transcriptions, which carry no score.
const MODEL_CONFIDENCE: f64 = 80.0;

const LLAVA_MODEL: &str = "@cf/llava-hf/llava-1.5-7b-hf";

/// OCR through the Cloudflare Workers AI LLaVA model.
///
/// The model returns plain text without geometry, so words and lines carry
/// zero-sized boxes.
pub struct WorkersAiOcrEngine {
    http: Client,
    account_id: String,
    api_token: String,
}

#[derive(Deserialize)]
struct LlavaResponse {
    result: LlavaResult,
}

#[derive(Deserialize)]
struct LlavaResult {
    description: String,
}

impl WorkersAiOcrEngine {
    pub fn new(account_id: String, api_token: String) -> Self {
        Self {
            http: Client::new(),
            account_id,
            api_token,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/ai/run/{}",
            self.account_id, LLAVA_MODEL
        )
    }
}

/// Split a transcription into lines and words.
pub fn transcription_to_result(text: &str, confidence: f64) -> OcrResult {
    let lines: Vec<OcrLine> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| OcrLine {
            text: l.to_string(),
            confidence,
            bbox: BoundingBox::default(),
        })
        .collect();
    let words = lines
        .iter()
        .flat_map(|l| l.text.split_whitespace())
        .map(|w| OcrWord {
            text: w.to_string(),
            confidence,
            bbox: BoundingBox::default(),
        })
        .collect();
    OcrResult {
        text: text.trim().to_string(),
        confidence: if lines.is_empty() { 0.0 } else { confidence },
        words,
        lines,
    }
}

#[async_trait]
impl Lifecycle for WorkersAiOcrEngine {
    fn name(&self) -> &str {
        "workers-ai-llava"
    }

    async fn initialize(&self) -> Result<(), PipelineError> {
        if self.account_id.is_empty() || self.api_token.is_empty() {
            return Err(PipelineError::Processing(
                "Workers AI credentials are not configured".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl OcrEngine for WorkersAiOcrEngine {
    async fn process_image(
        &self,
        image: &[u8],
        options: &OcrOptions,
    ) -> Result<OcrResult, PipelineError> {
        let prompt = format!(
            "Transcribe every piece of text visible in this floor plan image \
             (language: {}). Return only the text, one label per line, \
             without commentary.",
            options.language
        );
        let request_body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(image),
            "prompt": prompt,
            "max_tokens": 512
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_token)
            .json(&request_body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PipelineError::Processing(format!(
                "Workers AI returned {}",
                response.status()
            )));
        }
        let llava: LlavaResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Processing(format!("Unexpected LLaVA response: {e}")))?;

        Ok(transcription_to_result(&llava.result.description, MODEL_CONFIDENCE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::image_loader::LoadedImage;
    use image::{GrayImage, Luma};
    use std::sync::Mutex;

    /// Reports the crop size it was given as its text.
    #[derive(Default)]
    struct SizeEcho {
        calls: Mutex<Vec<(u32, u32)>>,
    }

    #[async_trait]
    impl Lifecycle for SizeEcho {
        fn name(&self) -> &str {
            "size-echo"
        }
    }

    #[async_trait]
    impl OcrEngine for SizeEcho {
        async fn process_image(
            &self,
            image: &[u8],
            _options: &OcrOptions,
        ) -> Result<OcrResult, PipelineError> {
            let decoded = image::load_from_memory(image).unwrap();
            self.calls
                .lock()
                .unwrap()
                .push((decoded.width(), decoded.height()));
            Ok(OcrResult {
                text: format!("{}x{}", decoded.width(), decoded.height()),
                confidence: 90.0,
                words: vec![OcrWord {
                    text: "w".into(),
                    confidence: 90.0,
                    bbox: BoundingBox::new(1.0, 2.0, 3.0, 4.0),
                }],
                lines: vec![],
            })
        }
    }

    fn region(x: u32, y: u32, width: u32, height: u32, label: &str) -> Region {
        Region {
            x,
            y,
            width,
            height,
            label: label.into(),
        }
    }

    #[tokio::test]
    async fn test_regions_are_cropped_and_offset() {
        let png = LoadedImage::from_gray(GrayImage::from_pixel(200, 100, Luma([255])))
            .unwrap()
            .bytes
            .to_vec();
        let engine = SizeEcho::default();
        let options = OcrOptions {
            language: "eng".into(),
        };
        let regions = [
            region(0, 0, 100, 50, "title"),
            region(150, 80, 100, 100, "corner"),
            region(500, 500, 10, 10, "outside"),
        ];

        let results = engine
            .process_image_regions(&png, &regions, &options)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].result.text, "100x50");
        assert_eq!(results[1].result.text, "50x20");
        assert_eq!(results[1].result.words[0].bbox.x, 151.0);
        assert_eq!(results[1].result.words[0].bbox.y, 82.0);
        assert_eq!(results[2].result, OcrResult::default());
        assert_eq!(engine.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_transcription_split() {
        let result = transcription_to_result("  KITCHEN\n\nLIVING ROOM \n", 80.0);
        assert_eq!(result.text, "KITCHEN\n\nLIVING ROOM");
        assert_eq!(result.lines.len(), 2);
        assert_eq!(result.words.len(), 3);
        assert_eq!(transcription_to_result("   ", 80.0).confidence, 0.0);
    }

    #[tokio::test]
    async fn test_initialize_requires_credentials() {
        let engine = WorkersAiOcrEngine::new(String::new(), "token".into());
        assert!(engine.initialize().await.is_err());
    }
}
