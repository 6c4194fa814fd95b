//! Raw moments up to second order, from pixels or from polygon edges.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use super::polygon;
use crate::models::geometry::Point;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub m20: f64,
    pub m11: f64,
    pub m02: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CentralMoments {
    pub mu20: f64,
    pub mu11: f64,
    pub mu02: f64,
}

impl Moments {
    pub fn area(&self) -> f64 {
        self.m00.abs()
    }

    /// `None` for an empty shape.
    pub fn centroid(&self) -> Option<Point> {
        if self.m00 == 0.0 {
            None
        } else {
            Some(Point::new(self.m10 / self.m00, self.m01 / self.m00))
        }
    }

    pub fn central(&self) -> CentralMoments {
        let Some(c) = self.centroid() else {
            return CentralMoments::default();
        };
        CentralMoments {
            mu20: self.m20 - c.x * self.m10,
            mu11: self.m11 - c.x * self.m01,
            mu02: self.m02 - c.y * self.m01,
        }
    }

    /// Angle of the major axis in radians, measured from +x.
    pub fn orientation(&self) -> f64 {
        let mu = self.central();
        0.5 * (2.0 * mu.mu11).atan2(mu.mu20 - mu.mu02)
    }

    /// 0 for a circle, approaching 1 for an elongated shape.
    pub fn eccentricity(&self) -> f64 {
        let mu = self.central();
        let spread = ((mu.mu20 - mu.mu02).powi(2) + 4.0 * mu.mu11.powi(2)).sqrt();
        let major = (mu.mu20 + mu.mu02 + spread) / 2.0;
        let minor = (mu.mu20 + mu.mu02 - spread) / 2.0;
        if major <= 0.0 {
            return 0.0;
        }
        (1.0 - (minor / major).max(0.0)).sqrt()
    }
}

/// Pixel-sum moments. With `binary`, every non-zero pixel weighs 1;
/// otherwise pixels weigh their intensity.
pub fn image_moments(gray: &GrayImage, binary: bool) -> Moments {
    let mut m = Moments::default();
    for (x, y, p) in gray.enumerate_pixels() {
        let v = p.0[0];
        if v == 0 {
            continue;
        }
        let w = if binary { 1.0 } else { v as f64 };
        let (x, y) = (x as f64, y as f64);
        m.m00 += w;
        m.m10 += w * x;
        m.m01 += w * y;
        m.m20 += w * x * x;
        m.m11 += w * x * y;
        m.m02 += w * y * y;
    }
    m
}

/// Moments of the region enclosed by a polygon via edge summation. The sign
/// is normalized so `m00` is non-negative regardless of winding.
pub fn polygon_moments(points: &[Point]) -> Moments {
    let ring = polygon::open_ring(points);
    let n = ring.len();
    let mut m = Moments::default();
    if n < 3 {
        return m;
    }

    for i in 0..n {
        let (a, b) = (ring[i], ring[(i + 1) % n]);
        let cross = a.x * b.y - b.x * a.y;
        m.m00 += cross;
        m.m10 += (a.x + b.x) * cross;
        m.m01 += (a.y + b.y) * cross;
        m.m20 += (a.x * a.x + a.x * b.x + b.x * b.x) * cross;
        m.m02 += (a.y * a.y + a.y * b.y + b.y * b.y) * cross;
        m.m11 += (a.x * b.y + 2.0 * a.x * a.y + 2.0 * b.x * b.y + b.x * a.y) * cross;
    }
    m.m00 /= 2.0;
    m.m10 /= 6.0;
    m.m01 /= 6.0;
    m.m20 /= 12.0;
    m.m02 /= 12.0;
    m.m11 /= 24.0;

    if m.m00 < 0.0 {
        m = Moments {
            m00: -m.m00,
            m10: -m.m10,
            m01: -m.m01,
            m20: -m.m20,
            m11: -m.m11,
            m02: -m.m02,
        };
    }
    m
}
