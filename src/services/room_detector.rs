use async_trait::async_trait;
use image::GrayImage;

use super::image_loader::LoadedImage;
use crate::geometry::components::{label_components, Connectivity};
use crate::geometry::contours::{binarize, trace_component, Foreground};
use crate::geometry::lines::{merge_lines, scan_runs};
use crate::models::geometry::{Line, Point};
use crate::models::vision::{Opening, Orientation, Room, RoomDetection, RoomSettings, RoomType, Wall};
use crate::workers::PipelineError;

/// Finds rooms, walls, doors and windows in a floor-plan image.
#[async_trait]
pub trait RoomDetector: Send + Sync {
    async fn detect_rooms(
        &self,
        image: &LoadedImage,
        settings: &RoomSettings,
    ) -> Result<RoomDetection, PipelineError>;
}

/// Room detection built on the geometry primitives.
///
/// Walls are dark strokes found by run scanning: parallel runs of one
/// stroke collapse into a center line and collinear pieces separated by
/// less than `max_line_gap` are bridged. Rooms are light regions enclosed
/// by walls, i.e. components that do not reach the image border.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeometryRoomDetector;

#[async_trait]
impl RoomDetector for GeometryRoomDetector {
    async fn detect_rooms(
        &self,
        image: &LoadedImage,
        settings: &RoomSettings,
    ) -> Result<RoomDetection, PipelineError> {
        let gray = image.gray.clone();
        let settings = settings.clone();
        Ok(tokio::task::spawn_blocking(move || detect(&gray, &settings)).await?)
    }
}

/// Runs closer than this (perpendicular, in pixels) belong to one stroke.
const STROKE_GAP: f64 = 2.0;

/// An axis-aligned segment: extent `lo..=hi` along its axis at `offset`
/// across it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct AxisSegment {
    orientation: Orientation,
    lo: f64,
    hi: f64,
    offset: f64,
}

impl AxisSegment {
    fn from_line(line: &Line) -> Option<Self> {
        let mid = line.midpoint();
        if line.is_horizontal(1.0) {
            Some(Self {
                orientation: Orientation::Horizontal,
                lo: line.start.x.min(line.end.x),
                hi: line.start.x.max(line.end.x),
                offset: mid.y,
            })
        } else if line.is_vertical(1.0) {
            Some(Self {
                orientation: Orientation::Vertical,
                lo: line.start.y.min(line.end.y),
                hi: line.start.y.max(line.end.y),
                offset: mid.x,
            })
        } else {
            None
        }
    }

    fn length(&self) -> f64 {
        self.hi - self.lo
    }

    fn point(&self, along: f64, across: f64) -> Point {
        match self.orientation {
            Orientation::Horizontal => Point::new(along, across),
            Orientation::Vertical => Point::new(across, along),
        }
    }

    fn to_line(self) -> Line {
        Line::from_points(
            self.point(self.lo, self.offset),
            self.point(self.hi, self.offset),
            1.0,
        )
    }

    /// Signed gap along the axis when `other` lies after `self`.
    fn gap_to(&self, other: &Self) -> f64 {
        other.lo - self.hi
    }

    fn overlap(&self, other: &Self) -> f64 {
        self.hi.min(other.hi) - self.lo.max(other.lo)
    }
}

fn stroke_segments(mask: &GrayImage, settings: &RoomSettings) -> Vec<AxisSegment> {
    let raw = scan_runs(mask, settings.min_segment_length);
    merge_lines(raw, STROKE_GAP, settings.min_segment_length)
        .iter()
        .filter_map(AxisSegment::from_line)
        .collect()
}

/// Join collinear segments whose ends are less than `max_gap` apart.
fn bridge_collinear(mut segments: Vec<AxisSegment>, max_gap: f64, tolerance: f64) -> Vec<AxisSegment> {
    loop {
        let mut merged_any = false;
        let mut i = 0;
        while i < segments.len() {
            let mut j = i + 1;
            while j < segments.len() {
                let (a, b) = (segments[i], segments[j]);
                let gap = a.gap_to(&b).max(b.gap_to(&a));
                if a.orientation == b.orientation
                    && (a.offset - b.offset).abs() <= tolerance
                    && (0.0..max_gap).contains(&gap)
                {
                    let (la, lb) = (a.length(), b.length());
                    let weight = (la + lb).max(f64::EPSILON);
                    segments[i] = AxisSegment {
                        orientation: a.orientation,
                        lo: a.lo.min(b.lo),
                        hi: a.hi.max(b.hi),
                        offset: (a.offset * la + b.offset * lb) / weight,
                    };
                    segments.remove(j);
                    merged_any = true;
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
        if !merged_any {
            return segments;
        }
    }
}

/// Gaps between collinear segments sized like a doorway. Each segment is
/// paired with its nearest collinear successor only.
fn find_doors(segments: &[AxisSegment], settings: &RoomSettings) -> Vec<Opening> {
    let mut doors = Vec::new();
    for a in segments {
        let nearest = segments
            .iter()
            .filter(|b| {
                b.orientation == a.orientation
                    && (a.offset - b.offset).abs() <= settings.alignment_tolerance
                    && a.gap_to(b) > 0.0
            })
            .min_by(|x, y| a.gap_to(x).total_cmp(&a.gap_to(y)));
        if let Some(b) = nearest {
            let gap = a.gap_to(b);
            if (settings.door_min_width..=settings.door_max_width).contains(&gap) {
                doors.push(Opening {
                    id: format!("door-{}", doors.len() + 1),
                    position: a.point((a.hi + b.lo) / 2.0, (a.offset + b.offset) / 2.0),
                    width: gap,
                    orientation: a.orientation,
                });
            }
        }
    }
    doors
}

/// Pairs of short parallel strokes drawn close together.
fn find_windows(segments: &[AxisSegment], settings: &RoomSettings) -> Vec<Opening> {
    let short: Vec<&AxisSegment> = segments
        .iter()
        .filter(|s| s.length() < settings.min_wall_length as f64)
        .collect();
    let mut used = vec![false; short.len()];
    let mut windows = Vec::new();

    for i in 0..short.len() {
        if used[i] {
            continue;
        }
        for j in i + 1..short.len() {
            if used[j] {
                continue;
            }
            let (a, b) = (short[i], short[j]);
            let separation = (a.offset - b.offset).abs();
            let overlap = a.overlap(b);
            if a.orientation == b.orientation
                && separation > STROKE_GAP
                && separation <= settings.window_max_separation
                && overlap >= 0.5 * a.length().min(b.length())
            {
                used[i] = true;
                used[j] = true;
                let lo = a.lo.max(b.lo);
                windows.push(Opening {
                    id: format!("window-{}", windows.len() + 1),
                    position: a.point(lo + overlap / 2.0, (a.offset + b.offset) / 2.0),
                    width: overlap,
                    orientation: a.orientation,
                });
                break;
            }
        }
    }
    windows
}

fn find_rooms(gray: &GrayImage, settings: &RoomSettings) -> Vec<Room> {
    let (width, height) = gray.dimensions();
    let floor = binarize(gray, settings.threshold, Foreground::Light);
    let map = label_components(&floor, Connectivity::Four);
    let max_area = settings.max_room_fraction * width as f64 * height as f64;
    let sq_ft_per_pixel = settings.feet_per_pixel * settings.feet_per_pixel;

    let mut rooms: Vec<Room> = map
        .components
        .iter()
        .filter(|c| !c.touches_border(width, height))
        .filter(|c| (settings.min_room_area..=max_area).contains(&(c.area as f64)))
        .filter_map(|c| {
            let contour = trace_component(c, &map, settings.epsilon)?;
            let area_sq_ft = c.area as f64 * sq_ft_per_pixel;
            Some(Room {
                id: String::new(),
                room_type: RoomType::classify(area_sq_ft, c.bounding_box.aspect_ratio()),
                polygon: contour.points,
                bounding_box: c.bounding_box,
                centroid: c.bounding_box.center(),
                area_pixels: c.area as f64,
                area_sq_ft,
                confidence: contour.confidence,
            })
        })
        .collect();

    rooms.sort_by(|a, b| b.area_pixels.total_cmp(&a.area_pixels));
    for (i, room) in rooms.iter_mut().enumerate() {
        room.id = format!("room-{}", i + 1);
    }
    rooms
}

pub fn detect(gray: &GrayImage, settings: &RoomSettings) -> RoomDetection {
    let mask = binarize(gray, settings.threshold, Foreground::Dark);
    let segments = bridge_collinear(
        stroke_segments(&mask, settings),
        settings.max_line_gap,
        settings.alignment_tolerance,
    );

    let walls = segments
        .iter()
        .filter(|s| s.length() >= settings.min_wall_length as f64)
        .enumerate()
        .map(|(i, s)| Wall {
            id: format!("wall-{}", i + 1),
            line: s.to_line(),
            orientation: s.orientation,
        })
        .collect();

    RoomDetection {
        rooms: find_rooms(gray, settings),
        walls,
        doors: find_doors(&segments, settings),
        windows: find_windows(&segments, settings),
    }
}
