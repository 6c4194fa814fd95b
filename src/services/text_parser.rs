use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use strsim::jaro_winkler;

use crate::models::ocr::{AreaNote, Dimension, FloorPlanText, RoomLabel};
use crate::workers::PipelineError;

/// Turns recognized text into floor-plan data. `Ok(None)` means nothing
/// domain-specific was found.
#[async_trait]
pub trait TextParser: Send + Sync {
    async fn parse_floor_plan_text(
        &self,
        text: &str,
        hints: Option<&serde_json::Value>,
    ) -> Result<Option<FloorPlanText>, PipelineError>;
}

/// Room names recognized on plans.
pub const ROOM_VOCABULARY: &[&str] = &[
    "living room",
    "family room",
    "great room",
    "dining room",
    "kitchen",
    "pantry",
    "bedroom",
    "master bedroom",
    "primary bedroom",
    "bathroom",
    "bath",
    "powder room",
    "closet",
    "walk-in closet",
    "hallway",
    "foyer",
    "entry",
    "laundry",
    "utility",
    "office",
    "study",
    "den",
    "garage",
    "porch",
    "patio",
    "deck",
];

pub const DEFAULT_MIN_SIMILARITY: f64 = 0.85;

// 12' x 14', 12'6" x 10'
static FEET_INCHES_DIMENSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\d+(?:\.\d+)?)'\s*(?:(\d{1,2})"\s*)?[xX×]\s*(\d+(?:\.\d+)?)'(?:\s*(\d{1,2})")?"#)
        .expect("valid regex")
});

// 12 x 14 ft
static UNIT_DIMENSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*[x×]\s*(\d+(?:\.\d+)?)\s*(?:ft|feet)\b").expect("valid regex")
});

// 250 sq ft, 1,200 SF, 90 square feet
static AREA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,3}(?:,\d{3})+|\d+(?:\.\d+)?)\s*(?:sq\.?\s*ft\.?|sf\b|square\s+feet|ft²)")
        .expect("valid regex")
});

// 1/4" = 1', scale 1:100
static SCALE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(\d+\s*/\s*\d+\s*(?:"|in)\s*=\s*\d+\s*'(?:\s*-?\s*0\s*")?)|scale\s*[:=]?\s*(1\s*:\s*\d+)"#)
        .expect("valid regex")
});

/// Regex and fuzzy-match parser for floor-plan annotations.
///
/// Hints may carry `rooms` (extra room names) and `minSimilarity`.
#[derive(Debug, Clone)]
pub struct FloorPlanTextParser {
    min_similarity: f64,
}

impl Default for FloorPlanTextParser {
    fn default() -> Self {
        Self {
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse().ok()
}

fn feet(whole: &str, inches: Option<regex::Match<'_>>) -> Option<f64> {
    let inches = match inches {
        Some(m) => m.as_str().parse::<f64>().ok()?,
        None => 0.0,
    };
    Some(parse_number(whole)? + inches / 12.0)
}

pub fn parse_dimensions(text: &str) -> Vec<Dimension> {
    let mut dims = Vec::new();
    for caps in FEET_INCHES_DIMENSION.captures_iter(text) {
        if let (Some(width), Some(length)) = (
            feet(&caps[1], caps.get(2)),
            feet(&caps[3], caps.get(4)),
        ) {
            dims.push(Dimension {
                raw: caps[0].trim().to_string(),
                width_ft: width,
                length_ft: length,
            });
        }
    }
    for caps in UNIT_DIMENSION.captures_iter(text) {
        if let (Some(width), Some(length)) = (parse_number(&caps[1]), parse_number(&caps[2])) {
            dims.push(Dimension {
                raw: caps[0].trim().to_string(),
                width_ft: width,
                length_ft: length,
            });
        }
    }
    dims
}

pub fn parse_areas(text: &str) -> Vec<AreaNote> {
    AREA.captures_iter(text)
        .filter_map(|caps| {
            Some(AreaNote {
                raw: caps[0].trim().to_string(),
                square_feet: parse_number(&caps[1])?,
            })
        })
        .collect()
}

pub fn parse_scale(text: &str) -> Option<String> {
    let caps = SCALE.captures(text)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Lowercased letters-and-spaces residue of a line once measurements are removed.
fn label_candidate(line: &str) -> String {
    let mut stripped = line.to_string();
    for re in [&*FEET_INCHES_DIMENSION, &*UNIT_DIMENSION, &*AREA, &*SCALE] {
        stripped = re.replace_all(&stripped, " ").into_owned();
    }
    stripped
        .chars()
        .map(|c| if c.is_alphabetic() || c == '-' { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl FloorPlanTextParser {
    pub fn new(min_similarity: f64) -> Self {
        Self { min_similarity }
    }

    pub fn match_room(&self, candidate: &str, extra: &[String]) -> Option<RoomLabel> {
        if candidate.is_empty() {
            return None;
        }
        let (name, similarity) = ROOM_VOCABULARY
            .iter()
            .map(|s| s.to_string())
            .chain(extra.iter().map(|s| s.to_lowercase()))
            .map(|name| {
                let score = jaro_winkler(candidate, &name);
                (name, score)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))?;
        (similarity >= self.min_similarity).then(|| RoomLabel {
            text: candidate.to_string(),
            name,
            similarity,
        })
    }
}

fn hint_rooms(hints: Option<&serde_json::Value>) -> Result<Vec<String>, PipelineError> {
    let Some(rooms) = hints.and_then(|h| h.get("rooms")) else {
        return Ok(Vec::new());
    };
    serde_json::from_value(rooms.clone())
        .map_err(|e| PipelineError::Processing(format!("Invalid room hints: {e}")))
}

#[async_trait]
impl TextParser for FloorPlanTextParser {
    async fn parse_floor_plan_text(
        &self,
        text: &str,
        hints: Option<&serde_json::Value>,
    ) -> Result<Option<FloorPlanText>, PipelineError> {
        let extra = hint_rooms(hints)?;
        let parser = match hints
            .and_then(|h| h.get("minSimilarity"))
            .and_then(|v| v.as_f64())
        {
            Some(min) => FloorPlanTextParser::new(min),
            None => self.clone(),
        };

        let rooms = text
            .lines()
            .filter_map(|line| parser.match_room(&label_candidate(line), &extra))
            .collect();
        let parsed = FloorPlanText {
            rooms,
            dimensions: parse_dimensions(text),
            areas: parse_areas(text),
            scale: parse_scale(text),
        };
        Ok((!parsed.is_empty()).then_some(parsed))
    }
}
