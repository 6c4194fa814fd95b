use std::io::Cursor;
use std::sync::Arc;

use base64::Engine;
use image::{GrayImage, ImageFormat, ImageReader};
use reqwest::Client;

use super::temp::TempWorkspace;
use crate::models::image::{ImageSize, ImageSource};
use crate::workers::PipelineError;

/// Name of the materialized copy of a remote image inside a job workspace.
const FETCHED_FILE: &str = "source.img";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLimits {
    pub max_bytes: u64,
    pub max_dimension: u32,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_bytes: 20 * 1024 * 1024,
            max_dimension: 10_000,
        }
    }
}

/// A decoded image: the encoded bytes engines consume and the grayscale
/// buffer the geometry code works on. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub bytes: Arc<Vec<u8>>,
    pub gray: Arc<GrayImage>,
    pub size: ImageSize,
}

impl LoadedImage {
    /// Wrap a grayscale buffer, encoding it as PNG for byte-oriented consumers.
    pub fn from_gray(gray: GrayImage) -> Result<Self, PipelineError> {
        let mut bytes = Vec::new();
        gray.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| PipelineError::Processing(format!("PNG encoding failed: {e}")))?;
        Ok(Self {
            size: ImageSize {
                width: gray.width(),
                height: gray.height(),
            },
            bytes: Arc::new(bytes),
            gray: Arc::new(gray),
        })
    }
}

/// Resolves [`ImageSource`]s to bytes and enforces size ceilings.
#[derive(Debug, Clone)]
pub struct ImageLoader {
    http: Client,
    limits: ImageLimits,
}

impl ImageLoader {
    pub fn new(limits: ImageLimits) -> Self {
        Self {
            http: Client::new(),
            limits,
        }
    }

    pub fn limits(&self) -> ImageLimits {
        self.limits
    }

    /// Obtain the raw bytes. Remote images are also written into `workspace`.
    pub async fn fetch(
        &self,
        source: &ImageSource,
        workspace: &TempWorkspace,
    ) -> Result<Vec<u8>, PipelineError> {
        match source {
            ImageSource::Bytes(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| PipelineError::Validation(format!("Invalid base64 image: {e}"))),
            ImageSource::Path(path) => tokio::fs::read(path).await.map_err(|e| {
                PipelineError::Source(format!("Failed to read {}: {e}", path.display()))
            }),
            ImageSource::Url(url) => {
                let mut response = self.http.get(url).send().await?.error_for_status()?;
                if let Some(len) = response.content_length() {
                    if len > self.limits.max_bytes {
                        return Err(self.too_large(len));
                    }
                }
                // Chunked responses carry no length; cap the running total.
                let mut bytes = Vec::new();
                while let Some(chunk) = response.chunk().await? {
                    let total = (bytes.len() + chunk.len()) as u64;
                    if total > self.limits.max_bytes {
                        return Err(self.too_large(total));
                    }
                    bytes.extend_from_slice(&chunk);
                }
                let path = workspace.write(FETCHED_FILE, &bytes).await?;
                tracing::debug!(url = %url, path = %path.display(), bytes = bytes.len(), "Remote image materialized");
                Ok(bytes)
            }
        }
    }

    fn too_large(&self, len: u64) -> PipelineError {
        PipelineError::Validation(format!(
            "Image is at least {len} bytes, limit is {}",
            self.limits.max_bytes
        ))
    }

    /// Check byte size and header dimensions without a full decode.
    pub fn validate(&self, bytes: &[u8]) -> Result<ImageSize, PipelineError> {
        if bytes.is_empty() {
            return Err(PipelineError::Validation("Image is empty".to_string()));
        }
        if bytes.len() as u64 > self.limits.max_bytes {
            return Err(self.too_large(bytes.len() as u64));
        }
        let (width, height) = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| PipelineError::Validation(e.to_string()))?
            .into_dimensions()?;
        if width > self.limits.max_dimension || height > self.limits.max_dimension {
            return Err(PipelineError::Validation(format!(
                "Image is {width}x{height}, limit is {} per side",
                self.limits.max_dimension
            )));
        }
        Ok(ImageSize { width, height })
    }

    /// Full decode to grayscale, off the async runtime.
    pub async fn decode(bytes: Vec<u8>) -> Result<LoadedImage, PipelineError> {
        tokio::task::spawn_blocking(move || -> Result<LoadedImage, PipelineError> {
            let gray = image::load_from_memory(&bytes)?.to_luma8();
            Ok(LoadedImage {
                size: ImageSize {
                    width: gray.width(),
                    height: gray.height(),
                },
                bytes: Arc::new(bytes),
                gray: Arc::new(gray),
            })
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobId;
    use image::Luma;

    fn png(width: u32, height: u32) -> Vec<u8> {
        LoadedImage::from_gray(GrayImage::from_pixel(width, height, Luma([200])))
            .unwrap()
            .bytes
            .to_vec()
    }

    #[test]
    fn test_validate_reads_dimensions() {
        let loader = ImageLoader::new(ImageLimits::default());
        let size = loader.validate(&png(30, 20)).unwrap();
        assert_eq!(size, ImageSize { width: 30, height: 20 });
    }

    #[test]
    fn test_validate_rejects_oversized() {
        let loader = ImageLoader::new(ImageLimits {
            max_bytes: 10,
            max_dimension: 10_000,
        });
        let err = loader.validate(&png(30, 20)).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        let loader = ImageLoader::new(ImageLimits {
            max_bytes: 1 << 20,
            max_dimension: 25,
        });
        assert!(matches!(
            loader.validate(&png(30, 20)),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_garbage() {
        let loader = ImageLoader::new(ImageLimits::default());
        assert!(matches!(
            loader.validate(b"definitely not an image"),
            Err(PipelineError::Validation(_))
        ));
    }

    /// Serve `/plan.png` as a chunked body (no `Content-Length`) made of
    /// `chunks` copies of `chunk`.
    async fn serve_chunked(chunk: Vec<u8>, chunks: usize) -> String {
        let app = axum::Router::new().route(
            "/plan.png",
            axum::routing::get(move || {
                let parts: Vec<Result<Vec<u8>, std::io::Error>> =
                    (0..chunks).map(|_| Ok(chunk.clone())).collect();
                async move { axum::body::Body::from_stream(futures::stream::iter(parts)) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/plan.png")
    }

    #[tokio::test]
    async fn test_fetch_chunked_response_over_limit_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let ws = TempWorkspace::create(root.path(), JobId::new()).unwrap();
        let loader = ImageLoader::new(ImageLimits {
            max_bytes: 4 * 1024,
            max_dimension: 10_000,
        });

        let url = serve_chunked(vec![0u8; 1024], 64).await;
        let err = loader.fetch(&ImageSource::Url(url), &ws).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)), "got {err:?}");
        assert!(!ws.file(FETCHED_FILE).exists());
    }

    #[tokio::test]
    async fn test_fetch_chunked_response_within_limit_is_materialized() {
        let root = tempfile::tempdir().unwrap();
        let ws = TempWorkspace::create(root.path(), JobId::new()).unwrap();
        let loader = ImageLoader::new(ImageLimits::default());

        let image = png(8, 8);
        let url = serve_chunked(image.clone(), 1).await;
        let bytes = loader.fetch(&ImageSource::Url(url), &ws).await.unwrap();
        assert_eq!(bytes, image);
        assert_eq!(std::fs::read(ws.file(FETCHED_FILE)).unwrap(), image);
    }

    #[tokio::test]
    async fn test_fetch_embedded_bytes_and_missing_path() {
        let root = tempfile::tempdir().unwrap();
        let ws = TempWorkspace::create(root.path(), JobId::new()).unwrap();
        let loader = ImageLoader::new(ImageLimits::default());

        let encoded = base64::engine::general_purpose::STANDARD.encode(png(4, 4));
        let bytes = loader.fetch(&ImageSource::Bytes(encoded), &ws).await.unwrap();
        let decoded = ImageLoader::decode(bytes).await.unwrap();
        assert_eq!(decoded.size, ImageSize { width: 4, height: 4 });

        let missing = loader
            .fetch(&ImageSource::Path("/nonexistent/plan.png".into()), &ws)
            .await
            .unwrap_err();
        assert!(matches!(missing, PipelineError::Source(_)));
    }
}
