use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::models::geometry::Point;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CornerSettings {
    pub max_corners: usize,
    /// Minimum score as a fraction of the strongest score in the image.
    pub corner_quality: f64,
    pub min_corner_distance: f64,
}

impl Default for CornerSettings {
    fn default() -> Self {
        Self {
            max_corners: 100,
            corner_quality: 0.7,
            min_corner_distance: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Corner {
    pub point: Point,
    pub score: u32,
}

/// Sum of absolute differences between a pixel and its 8 neighbors.
/// Only defined for interior pixels.
fn corner_score(gray: &GrayImage, x: u32, y: u32) -> u32 {
    let center = gray.get_pixel(x, y).0[0] as i32;
    let mut score = 0u32;
    for dy in -1i32..=1 {
        for dx in -1i32..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let v = gray
                .get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)
                .0[0] as i32;
            score += (center - v).unsigned_abs();
        }
    }
    score
}

pub fn detect_corners(gray: &GrayImage, settings: &CornerSettings) -> Vec<Corner> {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let score = corner_score(gray, x, y);
            if score > 0 {
                candidates.push(Corner {
                    point: Point::from((x, y)),
                    score,
                });
            }
        }
    }
    let Some(max_score) = candidates.iter().map(|c| c.score).max() else {
        return Vec::new();
    };
    let cutoff = settings.corner_quality.clamp(0.0, 1.0) * max_score as f64;

    candidates.retain(|c| c.score as f64 >= cutoff);
    // Stable: equal scores keep raster order.
    candidates.sort_by(|a, b| b.score.cmp(&a.score));

    let mut kept: Vec<Corner> = Vec::new();
    for candidate in candidates {
        if kept.len() >= settings.max_corners {
            break;
        }
        if kept
            .iter()
            .all(|k| k.point.distance(&candidate.point) >= settings.min_corner_distance)
        {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn dark_square() -> GrayImage {
        GrayImage::from_fn(40, 40, |x, y| {
            if (10..30).contains(&x) && (10..30).contains(&y) {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    #[test]
    fn test_square_yields_four_corners() {
        let corners = detect_corners(&dark_square(), &CornerSettings::default());
        assert_eq!(corners.len(), 4);
        for c in &corners {
            let on_square_corner = |v: f64| v == 10.0 || v == 29.0;
            assert!(on_square_corner(c.point.x) && on_square_corner(c.point.y), "unexpected corner {:?}", c);
        }
    }

    #[test]
    fn test_max_corners_caps_output() {
        let settings = CornerSettings {
            max_corners: 2,
            ..Default::default()
        };
        assert_eq!(detect_corners(&dark_square(), &settings).len(), 2);
    }

    #[test]
    fn test_flat_image_has_no_corners() {
        let img = GrayImage::from_pixel(10, 10, Luma([90]));
        assert!(detect_corners(&img, &CornerSettings::default()).is_empty());
    }
}
