use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::geometry::BoundingBox;
use super::image::{ImageSource, Region};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OcrOutputFormat {
    /// Text and confidence only.
    Text,
    /// Text plus parsed floor-plan data.
    Structured,
    #[default]
    Json,
}

/// Pipeline checkpoints reported as job progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum OcrStage {
    Starting,
    Validating,
    Preprocessing,
    Recognizing,
    Parsing,
    Caching,
    Formatting,
    Completed,
}

fn default_language() -> String {
    "eng".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OcrSettings {
    #[garde(length(min = 2, max = 16))]
    #[serde(default = "default_language")]
    pub language: String,

    #[garde(skip)]
    #[serde(default = "default_true")]
    pub preprocess: bool,

    #[garde(dive)]
    #[serde(default)]
    pub regions: Vec<Region>,

    #[garde(skip)]
    #[serde(default)]
    pub output_format: OcrOutputFormat,

    /// Passed through to the text parser.
    #[garde(skip)]
    #[serde(default)]
    pub hints: Option<serde_json::Value>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            language: default_language(),
            preprocess: true,
            regions: Vec::new(),
            output_format: OcrOutputFormat::default(),
            hints: None,
        }
    }
}

/// Payload of a job on the OCR queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrJobPayload {
    pub image: ImageSource,
    #[serde(default)]
    pub settings: OcrSettings,
}

/// Options forwarded to an OCR engine call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrOptions {
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    pub text: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
}

/// What an OCR engine returns for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub text: String,
    /// 0–100.
    pub confidence: f64,
    #[serde(default)]
    pub words: Vec<OcrWord>,
    #[serde(default)]
    pub lines: Vec<OcrLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionResult {
    pub region: Region,
    pub result: OcrResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionText {
    pub label: String,
    pub text: String,
    pub confidence: f64,
}

/// Full result of one OCR job before output formatting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrOutput {
    pub text: String,
    pub confidence: f64,
    pub words: Vec<OcrWord>,
    pub lines: Vec<OcrLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regions: Option<Vec<RegionText>>,
    pub structured_data: Option<FloorPlanText>,
    pub processing_time: u64,
}

/// Domain data recovered from floor-plan text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FloorPlanText {
    pub rooms: Vec<RoomLabel>,
    pub dimensions: Vec<Dimension>,
    pub areas: Vec<AreaNote>,
    pub scale: Option<String>,
}

impl FloorPlanText {
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
            && self.dimensions.is_empty()
            && self.areas.is_empty()
            && self.scale.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomLabel {
    /// Text as it appeared.
    pub text: String,
    /// Canonical room name it matched.
    pub name: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimension {
    pub raw: String,
    pub width_ft: f64,
    pub length_ft: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaNote {
    pub raw: String,
    pub square_feet: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings: OcrSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.language, "eng");
        assert!(settings.preprocess);
        assert_eq!(settings.output_format, OcrOutputFormat::Json);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_zero_sized_region_is_rejected() {
        let settings: OcrSettings = serde_json::from_value(serde_json::json!({
            "regions": [{"x": 0, "y": 0, "w": 0, "h": 10, "label": "title"}]
        }))
        .unwrap();
        assert!(settings.validate().is_err());
    }
}
