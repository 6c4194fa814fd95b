use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use super::buffer::{self, SOBEL_X, SOBEL_Y};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EdgeSettings {
    /// Gradient magnitude at or above which a pixel is an edge.
    pub low_threshold: u8,
    /// Gradient magnitude counted as a strong edge.
    pub high_threshold: u8,
    /// Apply the 3×3 Gaussian blur before differentiation.
    pub blur: bool,
}

impl Default for EdgeSettings {
    fn default() -> Self {
        Self {
            low_threshold: 50,
            high_threshold: 150,
            blur: true,
        }
    }
}

/// Binary edge map plus pixel statistics.
#[derive(Debug, Clone)]
pub struct EdgeMap {
    pub edges: GrayImage,
    pub edge_pixels: u64,
    pub strong_edge_pixels: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeSummary {
    pub width: u32,
    pub height: u32,
    pub edge_pixels: u64,
    pub strong_edge_pixels: u64,
    pub edge_percentage: f64,
}

impl EdgeMap {
    pub fn edge_percentage(&self) -> f64 {
        let total = self.edges.width() as u64 * self.edges.height() as u64;
        if total == 0 {
            0.0
        } else {
            self.edge_pixels as f64 / total as f64 * 100.0
        }
    }

    pub fn summary(&self) -> EdgeSummary {
        EdgeSummary {
            width: self.edges.width(),
            height: self.edges.height(),
            edge_pixels: self.edge_pixels,
            strong_edge_pixels: self.strong_edge_pixels,
            edge_percentage: self.edge_percentage(),
        }
    }
}

/// Gradient magnitude per pixel: Euclidean norm of the Sobel responses,
/// clamped to a byte.
pub fn gradient_magnitude(gray: &GrayImage) -> GrayImage {
    let (width, height) = gray.dimensions();
    let gx = buffer::convolve3(gray, &SOBEL_X);
    let gy = buffer::convolve3(gray, &SOBEL_Y);
    GrayImage::from_fn(width, height, |x, y| {
        let i = (y * width + x) as usize;
        let magnitude = ((gx[i] as f64).powi(2) + (gy[i] as f64).powi(2)).sqrt();
        Luma([magnitude.min(255.0) as u8])
    })
}

/// Blur, differentiate along both axes, combine and binarize at `low_threshold`.
pub fn detect_edges(gray: &GrayImage, settings: &EdgeSettings) -> EdgeMap {
    let smoothed = if settings.blur {
        buffer::gaussian_blur(gray)
    } else {
        gray.clone()
    };
    let magnitude = gradient_magnitude(&smoothed);

    let mut edge_pixels = 0u64;
    let mut strong_edge_pixels = 0u64;
    let edges = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let m = magnitude.get_pixel(x, y).0[0];
        if m >= settings.high_threshold {
            strong_edge_pixels += 1;
        }
        if m >= settings.low_threshold {
            edge_pixels += 1;
            Luma([255])
        } else {
            Luma([0])
        }
    });

    EdgeMap {
        edges,
        edge_pixels,
        strong_edge_pixels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_on_white() -> GrayImage {
        GrayImage::from_fn(40, 40, |x, y| {
            if (10..30).contains(&x) && (10..30).contains(&y) {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    #[test]
    fn test_uniform_image_has_no_edges() {
        let img = GrayImage::from_pixel(16, 16, Luma([128]));
        let map = detect_edges(&img, &EdgeSettings::default());
        assert_eq!(map.edge_pixels, 0);
        assert_eq!(map.edge_percentage(), 0.0);
    }

    #[test]
    fn test_edges_are_deterministic() {
        let img = square_on_white();
        let first = detect_edges(&img, &EdgeSettings::default());
        let second = detect_edges(&img, &EdgeSettings::default());
        assert!(first.edge_pixels > 0);
        assert_eq!(first.edge_pixels, second.edge_pixels);
        assert_eq!(first.edges, second.edges);
    }

    #[test]
    fn test_edges_hug_the_square_boundary() {
        let map = detect_edges(&square_on_white(), &EdgeSettings::default());
        assert_eq!(map.edges.get_pixel(10, 20).0[0], 255);
        assert_eq!(map.edges.get_pixel(20, 20).0[0], 0);
        assert_eq!(map.edges.get_pixel(2, 2).0[0], 0);
        assert!(map.strong_edge_pixels <= map.edge_pixels);
    }
}
