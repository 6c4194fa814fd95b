use std::path::PathBuf;

use garde::Validate;
use serde::{Deserialize, Serialize};

/// Where a worker obtains its input image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    /// Base64-encoded image bytes embedded in the payload.
    Bytes(String),
    /// File on the worker's local filesystem.
    Path(PathBuf),
    /// Remote image, fetched and materialized into the job's temp workspace.
    Url(String),
}

impl ImageSource {
    pub fn kind(&self) -> &'static str {
        match self {
            ImageSource::Bytes(_) => "bytes",
            ImageSource::Path(_) => "path",
            ImageSource::Url(_) => "url",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// A labelled rectangle of interest, in pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Region {
    #[garde(skip)]
    pub x: u32,
    #[garde(skip)]
    pub y: u32,
    #[garde(range(min = 1))]
    #[serde(alias = "w")]
    pub width: u32,
    #[garde(range(min = 1))]
    #[serde(alias = "h")]
    pub height: u32,
    #[garde(length(min = 1, max = 64))]
    pub label: String,
}

impl Region {
    /// Intersect with an image of `size`. `None` when nothing overlaps.
    pub fn clamp_to(&self, size: ImageSize) -> Option<(u32, u32, u32, u32)> {
        if self.x >= size.width || self.y >= size.height {
            return None;
        }
        let width = self.width.min(size.width - self.x);
        let height = self.height.min(size.height - self.y);
        (width > 0 && height > 0).then_some((self.x, self.y, width, height))
    }
}
