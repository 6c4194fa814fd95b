use std::collections::BTreeMap;

use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::geometry::{BoundingBox, Line, Point};
use super::image::{ImageSize, ImageSource};
use crate::geometry::{
    ContourDetection, ContourSettings, EdgeSettings, EdgeSummary, LineDetection, LineSettings,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AnalysisType {
    Edges,
    Lines,
    Contours,
    Rooms,
    Objects,
    #[default]
    Full,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VisionOutputFormat {
    /// Counts and booleans only.
    Simplified,
    /// Raw results plus the combined view.
    Detailed,
    #[default]
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum VisionStage {
    Starting,
    Validating,
    Edges,
    Lines,
    Contours,
    Rooms,
    Objects,
    Combining,
    Formatting,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomSettings {
    /// Gray level at or above which a pixel is open floor.
    #[garde(skip)]
    pub threshold: u8,
    /// Smallest enclosed region, in pixels, reported as a room.
    #[garde(range(min = 0.0))]
    pub min_room_area: f64,
    /// Regions covering more than this share of the image are background.
    #[garde(range(min = 0.0, max = 1.0))]
    pub max_room_fraction: f64,
    #[garde(range(min = 1))]
    pub min_wall_length: u32,
    /// Shortest segment kept at all; shorter ones feed window detection.
    #[garde(range(min = 1))]
    pub min_segment_length: u32,
    #[garde(range(min = 0.0))]
    pub max_line_gap: f64,
    /// Perpendicular offset under which two segments count as collinear.
    #[garde(range(min = 0.0))]
    pub alignment_tolerance: f64,
    #[garde(range(min = 0.0))]
    pub door_min_width: f64,
    #[garde(range(min = 0.0))]
    pub door_max_width: f64,
    /// Largest spacing between the two strokes of a window symbol.
    #[garde(range(min = 0.0))]
    pub window_max_separation: f64,
    #[garde(range(min = 1e-6))]
    pub feet_per_pixel: f64,
    #[garde(range(min = 0.0))]
    pub epsilon: f64,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            threshold: 128,
            min_room_area: 1000.0,
            max_room_fraction: 0.95,
            min_wall_length: 50,
            min_segment_length: 15,
            max_line_gap: 10.0,
            alignment_tolerance: 8.0,
            door_min_width: 15.0,
            door_max_width: 80.0,
            window_max_separation: 12.0,
            feet_per_pixel: 0.1,
            epsilon: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct ObjectSettings {
    #[garde(skip)]
    pub threshold: u8,
    #[garde(range(min = 1))]
    pub min_area: usize,
    #[garde(range(min = 1))]
    pub max_area: usize,
    /// Blobs wider or taller than this are structure, not objects.
    #[garde(range(min = 1.0))]
    pub max_dimension: f64,
    #[garde(skip)]
    pub fixture_max_area: usize,
}

impl Default for ObjectSettings {
    fn default() -> Self {
        Self {
            threshold: 128,
            min_area: 20,
            max_area: 5000,
            max_dimension: 120.0,
            fixture_max_area: 400,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct VisionSettings {
    #[garde(skip)]
    pub analysis_type: AnalysisType,
    #[garde(skip)]
    pub output_format: VisionOutputFormat,
    #[garde(skip)]
    pub edges: EdgeSettings,
    #[garde(skip)]
    pub lines: LineSettings,
    #[garde(skip)]
    pub contours: ContourSettings,
    #[garde(dive)]
    pub rooms: RoomSettings,
    #[garde(dive)]
    pub objects: ObjectSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionJobPayload {
    pub image: ImageSource,
    #[serde(default)]
    pub settings: VisionSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RoomType {
    Closet,
    Hallway,
    Bathroom,
    Bedroom,
    Kitchen,
    LivingRoom,
}

impl RoomType {
    /// Classify by floor area in square feet and width/height ratio.
    pub fn classify(area_sq_ft: f64, aspect_ratio: f64) -> Self {
        if area_sq_ft < 50.0 {
            RoomType::Closet
        } else if area_sq_ft < 100.0 {
            if !(0.67..=1.5).contains(&aspect_ratio) {
                RoomType::Hallway
            } else {
                RoomType::Bathroom
            }
        } else if area_sq_ft < 150.0 {
            RoomType::Bedroom
        } else if area_sq_ft < 250.0 {
            if aspect_ratio > 1.3 {
                RoomType::Kitchen
            } else {
                RoomType::Bedroom
            }
        } else {
            RoomType::LivingRoom
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub room_type: RoomType,
    pub polygon: Vec<Point>,
    pub bounding_box: BoundingBox,
    pub centroid: Point,
    pub area_pixels: f64,
    pub area_sq_ft: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wall {
    pub id: String,
    pub line: Line,
    pub orientation: Orientation,
}

/// An opening along a wall: a door gap or a window symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opening {
    pub id: String,
    pub position: Point,
    pub width: f64,
    pub orientation: Orientation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomDetection {
    pub rooms: Vec<Room>,
    pub walls: Vec<Wall>,
    pub doors: Vec<Opening>,
    pub windows: Vec<Opening>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ObjectCategory {
    Fixture,
    Furniture,
    Appliance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedObject {
    pub id: String,
    pub category: ObjectCategory,
    pub bounding_box: BoundingBox,
    pub area: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectDetection {
    pub objects: Vec<DetectedObject>,
    pub fixtures: Vec<DetectedObject>,
    pub furniture: Vec<DetectedObject>,
    pub appliances: Vec<DetectedObject>,
}

impl ObjectDetection {
    /// Sort a flat object list into its category lists.
    pub fn from_objects(objects: Vec<DetectedObject>) -> Self {
        let pick = |category| {
            objects
                .iter()
                .filter(|o| o.category == category)
                .cloned()
                .collect::<Vec<_>>()
        };
        Self {
            fixtures: pick(ObjectCategory::Fixture),
            furniture: pick(ObjectCategory::Furniture),
            appliances: pick(ObjectCategory::Appliance),
            objects,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDetectorStats {
    pub initialized: bool,
    pub images_processed: u64,
    pub objects_detected: u64,
}

/// Raw per-category results. Only the categories that ran are present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edges: Option<EdgeSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<LineDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contours: Option<ContourDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rooms: Option<RoomDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objects: Option<ObjectDetection>,
}

impl VisionAnalysis {
    pub fn detection_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        if let Some(edges) = &self.edges {
            counts.insert("edgePixels".to_string(), edges.edge_pixels as usize);
        }
        if let Some(lines) = &self.lines {
            counts.insert("lines".to_string(), lines.lines.len());
        }
        if let Some(contours) = &self.contours {
            counts.insert("contours".to_string(), contours.contours.len());
        }
        if let Some(rooms) = &self.rooms {
            counts.insert("rooms".to_string(), rooms.rooms.len());
            counts.insert("walls".to_string(), rooms.walls.len());
            counts.insert("doors".to_string(), rooms.doors.len());
            counts.insert("windows".to_string(), rooms.windows.len());
        }
        if let Some(objects) = &self.objects {
            counts.insert("objects".to_string(), objects.objects.len());
        }
        counts
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Structures {
    pub walls: Vec<Wall>,
    pub doors: Vec<Opening>,
    pub windows: Vec<Opening>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spaces {
    pub rooms: Vec<Room>,
    pub contours: Vec<crate::models::geometry::Contour>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub fixtures: Vec<DetectedObject>,
    pub furniture: Vec<DetectedObject>,
    pub appliances: Vec<DetectedObject>,
    pub objects: Vec<DetectedObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometryView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edges: Option<EdgeSummary>,
    pub lines: Vec<Line>,
}

/// Results regrouped by what they mean on a floor plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombinedView {
    pub structures: Structures,
    pub spaces: Spaces,
    pub features: Features,
    pub geometry: GeometryView,
}

impl CombinedView {
    pub fn from_analysis(analysis: &VisionAnalysis) -> Self {
        let rooms = analysis.rooms.clone().unwrap_or_default();
        let objects = analysis.objects.clone().unwrap_or_default();
        Self {
            structures: Structures {
                walls: rooms.walls,
                doors: rooms.doors,
                windows: rooms.windows,
            },
            spaces: Spaces {
                rooms: rooms.rooms,
                contours: analysis
                    .contours
                    .as_ref()
                    .map(|c| c.contours.clone())
                    .unwrap_or_default(),
            },
            features: Features {
                fixtures: objects.fixtures,
                furniture: objects.furniture,
                appliances: objects.appliances,
                objects: objects.objects,
            },
            geometry: GeometryView {
                edges: analysis.edges.clone(),
                lines: analysis
                    .lines
                    .as_ref()
                    .map(|l| l.lines.clone())
                    .unwrap_or_default(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetadata {
    pub processing_time: u64,
    pub image_size: ImageSize,
    pub detection_counts: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_classification_bands() {
        assert_eq!(RoomType::classify(30.0, 1.0), RoomType::Closet);
        assert_eq!(RoomType::classify(80.0, 3.0), RoomType::Hallway);
        assert_eq!(RoomType::classify(80.0, 1.0), RoomType::Bathroom);
        assert_eq!(RoomType::classify(120.0, 1.0), RoomType::Bedroom);
        assert_eq!(RoomType::classify(200.0, 1.6), RoomType::Kitchen);
        assert_eq!(RoomType::classify(200.0, 1.0), RoomType::Bedroom);
        assert_eq!(RoomType::classify(400.0, 1.0), RoomType::LivingRoom);
    }

    #[test]
    fn test_analysis_type_parse() {
        assert_eq!("rooms".parse::<AnalysisType>().unwrap(), AnalysisType::Rooms);
        let settings: VisionSettings =
            serde_json::from_value(serde_json::json!({"analysisType": "edges"})).unwrap();
        assert_eq!(settings.analysis_type, AnalysisType::Edges);
        assert_eq!(settings.output_format, VisionOutputFormat::Json);
    }

    #[test]
    fn test_objects_grouped_by_category() {
        let obj = |id: &str, category| DetectedObject {
            id: id.to_string(),
            category,
            bounding_box: BoundingBox::default(),
            area: 1.0,
            confidence: 1.0,
        };
        let detection = ObjectDetection::from_objects(vec![
            obj("a", ObjectCategory::Fixture),
            obj("b", ObjectCategory::Appliance),
            obj("c", ObjectCategory::Fixture),
        ]);
        assert_eq!(detection.objects.len(), 3);
        assert_eq!(detection.fixtures.len(), 2);
        assert_eq!(detection.appliances.len(), 1);
        assert!(detection.furniture.is_empty());
    }
}
