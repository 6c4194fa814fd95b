use serde::{Deserialize, Serialize};

/// A point in pixel space. Sub-pixel values appear after merging and averaging.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl From<(u32, u32)> for Point {
    fn from((x, y): (u32, u32)) -> Self {
        Self::new(x as f64, y as f64)
    }
}

/// A straight segment with its angle in degrees, normalized to `[0, 180)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub start: Point,
    pub end: Point,
    pub angle: f64,
    pub length: f64,
    pub confidence: f64,
}

impl Line {
    /// Build a line from two endpoints, deriving angle and length.
    pub fn from_points(start: Point, end: Point, confidence: f64) -> Self {
        let dx = end.x - start.x;
        let dy = end.y - start.y;
        Self {
            start,
            end,
            angle: normalize_angle(dy.atan2(dx).to_degrees()),
            length: (dx * dx + dy * dy).sqrt(),
            confidence,
        }
    }

    pub fn midpoint(&self) -> Point {
        Point::new(
            (self.start.x + self.end.x) / 2.0,
            (self.start.y + self.end.y) / 2.0,
        )
    }

    /// Within `tolerance` degrees of the horizontal axis.
    pub fn is_horizontal(&self, tolerance: f64) -> bool {
        axis_distance(self.angle, 0.0) <= tolerance
    }

    /// Within `tolerance` degrees of the vertical axis.
    pub fn is_vertical(&self, tolerance: f64) -> bool {
        axis_distance(self.angle, 90.0) <= tolerance
    }
}

/// Fold any angle in degrees into `[0, 180)`.
pub fn normalize_angle(degrees: f64) -> f64 {
    let folded = degrees.rem_euclid(180.0);
    if folded >= 180.0 {
        0.0
    } else {
        folded
    }
}

/// Smallest difference between two undirected angles, in `[0, 90]`.
pub fn axis_distance(a: f64, b: f64) -> f64 {
    let diff = (normalize_angle(a) - normalize_angle(b)).abs();
    diff.min(180.0 - diff)
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Axis-aligned extent of a point set. Empty input yields a zero box.
    pub fn from_points(points: &[Point]) -> Self {
        let Some(first) = points.first() else {
            return Self::default();
        };
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0.0 {
            0.0
        } else {
            self.width / self.height
        }
    }
}

/// A closed polygon boundary. `points` repeats the first point at the end.
///
/// Contours are stored in a flat `Vec<Contour>`; `parent` and `children` are
/// indices into that vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contour {
    pub points: Vec<Point>,
    pub area: f64,
    pub perimeter: f64,
    pub centroid: Point,
    pub bounding_box: BoundingBox,
    pub parent: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<usize>,
    pub depth: usize,
    pub is_convex: bool,
    pub confidence: f64,
}
