use image::GrayImage;
use serde::{Deserialize, Serialize};

use super::edges::{self, EdgeSettings, EdgeSummary};
use super::polygon;
use crate::models::geometry::{axis_distance, Line, Point};

/// Segments whose angles differ by less than this many degrees may merge.
const MERGE_ANGLE_TOLERANCE: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LineSettings {
    #[serde(flatten)]
    pub edges: EdgeSettings,
    pub min_line_length: u32,
    pub max_line_gap: f64,
    /// Degrees either side of an axis that still count as horizontal/vertical.
    pub axis_tolerance: f64,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            edges: EdgeSettings::default(),
            min_line_length: 30,
            max_line_gap: 10.0,
            axis_tolerance: 15.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineDetection {
    pub lines: Vec<Line>,
    pub horizontal_lines: Vec<Line>,
    pub vertical_lines: Vec<Line>,
    pub dominant_angle: f64,
    pub edges: EdgeSummary,
}

fn confidence_for(length: f64, min_line_length: u32) -> f64 {
    let min = min_line_length.max(1) as f64;
    length / (length + min)
}

/// Contiguous runs of non-zero pixels along rows (angle 0) and columns
/// (angle 90) that are at least `min_line_length` long.
pub fn scan_runs(edge_map: &GrayImage, min_line_length: u32) -> Vec<Line> {
    let (width, height) = edge_map.dimensions();
    let min_len = min_line_length.max(1);
    let mut lines = Vec::new();

    let mut emit = |start: Point, end: Point, run: u32| {
        if run >= min_len {
            let line = Line::from_points(start, end, 0.0);
            let confidence = confidence_for(line.length, min_len);
            lines.push(Line { confidence, ..line });
        }
    };

    for y in 0..height {
        let mut run_start = None;
        for x in 0..=width {
            let on = x < width && edge_map.get_pixel(x, y).0[0] > 0;
            match (on, run_start) {
                (true, None) => run_start = Some(x),
                (false, Some(s)) => {
                    emit(Point::from((s, y)), Point::from((x - 1, y)), x - s);
                    run_start = None;
                }
                _ => {}
            }
        }
    }

    for x in 0..width {
        let mut run_start = None;
        for y in 0..=height {
            let on = y < height && edge_map.get_pixel(x, y).0[0] > 0;
            match (on, run_start) {
                (true, None) => run_start = Some(y),
                (false, Some(s)) => {
                    emit(Point::from((x, s)), Point::from((x, y - 1)), y - s);
                    run_start = None;
                }
                _ => {}
            }
        }
    }

    lines
}

/// Smallest endpoint-to-segment distance between two segments.
pub fn segment_gap(a: &Line, b: &Line) -> f64 {
    [
        polygon::segment_distance(&a.start, &b.start, &b.end),
        polygon::segment_distance(&a.end, &b.start, &b.end),
        polygon::segment_distance(&b.start, &a.start, &a.end),
        polygon::segment_distance(&b.end, &a.start, &a.end),
    ]
    .into_iter()
    .fold(f64::INFINITY, f64::min)
}

fn can_merge(a: &Line, b: &Line, max_gap: f64) -> bool {
    axis_distance(a.angle, b.angle) < MERGE_ANGLE_TOLERANCE && segment_gap(a, b) < max_gap
}

/// Combine two near-parallel segments into the one spanning the extent of all
/// four endpoints, measured along the longer segment's direction.
pub fn merge_pair(a: &Line, b: &Line, min_line_length: u32) -> Line {
    let longer = if a.length >= b.length { a } else { b };
    let theta = longer.angle.to_radians();
    let (ux, uy) = (theta.cos(), theta.sin());

    let endpoints = [a.start, a.end, b.start, b.end];
    let center = Point::new(
        endpoints.iter().map(|p| p.x).sum::<f64>() / 4.0,
        endpoints.iter().map(|p| p.y).sum::<f64>() / 4.0,
    );
    let (t_min, t_max) = endpoints
        .iter()
        .map(|p| (p.x - center.x) * ux + (p.y - center.y) * uy)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), t| {
            (lo.min(t), hi.max(t))
        });

    let start = Point::new(center.x + t_min * ux, center.y + t_min * uy);
    let end = Point::new(center.x + t_max * ux, center.y + t_max * uy);
    let line = Line::from_points(start, end, 0.0);
    Line {
        confidence: confidence_for(line.length, min_line_length),
        ..line
    }
}

/// Merge segments pairwise until no two remaining segments qualify.
pub fn merge_lines(mut lines: Vec<Line>, max_gap: f64, min_line_length: u32) -> Vec<Line> {
    loop {
        let mut merged_any = false;
        let mut i = 0;
        while i < lines.len() {
            let mut j = i + 1;
            while j < lines.len() {
                if can_merge(&lines[i], &lines[j], max_gap) {
                    let other = lines.remove(j);
                    lines[i] = merge_pair(&lines[i], &other, min_line_length);
                    merged_any = true;
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
        if !merged_any {
            return lines;
        }
    }
}

/// Length-weighted histogram over 0/45/90/135 degree bins. Returns the
/// heaviest bin's angle, or 0 when there are no lines.
pub fn dominant_angle(lines: &[Line]) -> f64 {
    let mut bins = [0.0f64; 4];
    for line in lines {
        let bin = ((line.angle / 45.0).round() as usize) % 4;
        bins[bin] += line.length;
    }
    let (best, weight) = bins
        .iter()
        .enumerate()
        .fold((0, 0.0), |(bi, bw), (i, w)| if *w > bw { (i, *w) } else { (bi, bw) });
    if weight == 0.0 {
        0.0
    } else {
        best as f64 * 45.0
    }
}

/// Line detection over an already computed edge map.
pub fn lines_from_edges(edge_map: &GrayImage, settings: &LineSettings) -> Vec<Line> {
    let raw = scan_runs(edge_map, settings.min_line_length);
    merge_lines(raw, settings.max_line_gap, settings.min_line_length)
}

pub fn detect_lines(gray: &GrayImage, settings: &LineSettings) -> LineDetection {
    let edge_map = edges::detect_edges(gray, &settings.edges);
    let lines = lines_from_edges(&edge_map.edges, settings);

    let horizontal_lines = lines
        .iter()
        .filter(|l| l.is_horizontal(settings.axis_tolerance))
        .cloned()
        .collect();
    let vertical_lines = lines
        .iter()
        .filter(|l| l.is_vertical(settings.axis_tolerance))
        .cloned()
        .collect();

    LineDetection {
        dominant_angle: dominant_angle(&lines),
        horizontal_lines,
        vertical_lines,
        edges: edge_map.summary(),
        lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn hline(x0: f64, x1: f64, y: f64) -> Line {
        Line::from_points(Point::new(x0, y), Point::new(x1, y), 1.0)
    }

    #[test]
    fn test_collinear_segments_within_gap_merge() {
        let merged = merge_lines(vec![hline(10.0, 40.0, 50.0), hline(45.0, 80.0, 50.0)], 10.0, 30);
        assert_eq!(merged.len(), 1);
        let line = &merged[0];
        assert!((line.start.x - 10.0).abs() < 1e-9);
        assert!((line.end.x - 80.0).abs() < 1e-9);
        assert!((line.start.y - 50.0).abs() < 1e-9);
        assert_eq!(line.angle, 0.0);
    }

    #[test]
    fn test_segments_beyond_gap_stay_apart() {
        let merged = merge_lines(vec![hline(10.0, 40.0, 50.0), hline(55.0, 80.0, 50.0)], 10.0, 30);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_perpendicular_segments_never_merge() {
        let v = Line::from_points(Point::new(40.0, 50.0), Point::new(40.0, 90.0), 1.0);
        let merged = merge_lines(vec![hline(10.0, 40.0, 50.0), v], 10.0, 30);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_scan_runs_finds_row_and_column() {
        let mut edges = GrayImage::new(50, 50);
        for x in 5..45 {
            edges.put_pixel(x, 10, Luma([255]));
        }
        for y in 15..20 {
            edges.put_pixel(30, y, Luma([255]));
        }
        let lines = scan_runs(&edges, 30);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].start, Point::new(5.0, 10.0));
        assert_eq!(lines[0].end, Point::new(44.0, 10.0));
    }

    #[test]
    fn test_dominant_angle_weighted_by_length() {
        let v = Line::from_points(Point::new(0.0, 0.0), Point::new(0.0, 100.0), 1.0);
        assert_eq!(dominant_angle(&[hline(0.0, 40.0, 0.0), v]), 90.0);
        assert_eq!(dominant_angle(&[]), 0.0);
    }

    #[test]
    fn test_detect_lines_on_thick_rectangle() {
        let img = GrayImage::from_fn(200, 150, |x, y| {
            let on_wall = ((20..24).contains(&y) || (126..130).contains(&y)) && (20..180).contains(&x)
                || ((20..24).contains(&x) || (176..180).contains(&x)) && (20..130).contains(&y);
            Luma([if on_wall { 0 } else { 255 }])
        });
        let result = detect_lines(&img, &LineSettings::default());
        assert_eq!(result.horizontal_lines.len(), 2);
        assert_eq!(result.vertical_lines.len(), 2);
        assert_eq!(result.lines.len(), 4);
        assert_eq!(result.dominant_angle, 0.0);
    }
}
