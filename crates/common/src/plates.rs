//! Plate recognition contracts shared by the engine and the stream node.
//!
//! This module defines the data exchanged between the recognition pipeline,
//! the per-session stream worker and the connected client.

use serde::{Deserialize, Serialize};

/// Bounding box in frame pixel coordinates (corner form)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// Whether the box has a positive area
    pub fn is_valid(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }

    /// Center point as floating point coordinates
    pub fn center(&self) -> (f32, f32) {
        (
            (self.x1 + self.x2) as f32 / 2.0,
            (self.y1 + self.y2) as f32 / 2.0,
        )
    }

    /// Euclidean distance between the centers of two boxes
    pub fn center_distance(&self, other: &BoundingBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Clip the box to a `width` x `height` frame
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let w = width as i32;
        let h = height as i32;
        Self {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        }
    }

    /// Grow the box by `padding` pixels on every side, then clip to the frame
    pub fn padded(&self, padding: u32, width: u32, height: u32) -> Self {
        let p = padding as i32;
        Self {
            x1: self.x1 - p,
            y1: self.y1 - p,
            x2: self.x2 + p,
            y2: self.y2 + p,
        }
        .clamped(width, height)
    }
}

/// One raw recognizer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrCandidate {
    pub text: String,

    /// Recognizer confidence (0.0 to 1.0)
    pub confidence: f32,
}

impl OcrCandidate {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Combined text for one (preprocessing variant, confidence threshold) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrEntry {
    /// Preprocessing variant name (e.g. "otsu", "inverted")
    pub method: String,

    /// Confidence threshold the candidates were filtered with
    pub threshold: f32,

    /// Cleaned candidate texts concatenated by descending confidence
    pub text: String,

    /// Surviving candidates, cleaned, in concatenation order
    pub details: Vec<OcrCandidate>,
}

impl OcrEntry {
    /// Mean confidence of the surviving candidates
    pub fn mean_confidence(&self) -> f32 {
        if self.details.is_empty() {
            return 0.0;
        }
        self.details.iter().map(|c| c.confidence).sum::<f32>() / self.details.len() as f32
    }
}

/// Aggregated OCR outcome for one cropped region
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub best_text: String,
    pub best_confidence: f32,
    pub all_candidates: Vec<OcrEntry>,
}

impl OcrResult {
    /// Result returned when nothing could be read
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Plate numbering format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    /// Three letters followed by four digits
    Legacy,
    /// Three letters, one digit, one letter, two digits
    Mercosul,
    Unknown,
}

/// Recognized text classified against the known plate formats
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedPlate {
    pub raw_text: String,
    pub is_valid: bool,
    pub formatted_text: String,
    pub format_kind: FormatKind,
}

/// Registry entry for a plate known to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownPlateRecord {
    pub plate_number: String,

    #[serde(default)]
    pub is_regularized: bool,
}

/// Outcome of a fuzzy registry lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<KnownPlateRecord>,

    /// Best similarity seen (0 to 100)
    pub similarity: f32,
}

impl MatchResult {
    pub fn no_match(similarity: f32) -> Self {
        Self {
            matched: None,
            similarity,
        }
    }

    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }
}

/// Plate reported to the client for one processed frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateDetection {
    /// 1-based position of the plate within the frame
    pub index: usize,

    pub bounding_box: BoundingBox,

    /// Detector confidence (0.0 to 1.0)
    pub confidence: f32,

    pub text: String,

    /// OCR confidence (0.0 to 1.0)
    pub text_confidence: f32,

    pub formatted_text: String,
    pub is_valid: bool,
    pub format_kind: FormatKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_plate: Option<KnownPlateRecord>,

    /// Similarity against the closest registry entry (0 to 100)
    #[serde(default)]
    pub similarity: f32,
}

impl PlateDetection {
    /// Whether the plate resolved to a registry entry
    pub fn is_known(&self) -> bool {
        self.known_plate.is_some()
    }
}

/// Detailed report for one plate found in an uploaded image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateReport {
    pub detection: PlateDetection,

    /// Every OCR entry considered for this plate
    pub ocr_results: Vec<OcrEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_geometry() {
        let bbox = BoundingBox::new(10, 20, 110, 60);
        assert_eq!(bbox.width(), 100);
        assert_eq!(bbox.height(), 40);
        assert_eq!(bbox.center(), (60.0, 40.0));
        assert!(bbox.is_valid());
        assert!(!BoundingBox::new(5, 5, 5, 10).is_valid());
    }

    #[test]
    fn test_center_distance() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(30, 40, 40, 50);
        assert!((a.center_distance(&b) - 50.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_padding_is_clipped_to_frame() {
        let bbox = BoundingBox::new(2, 3, 95, 58);
        let padded = bbox.padded(5, 100, 60);
        assert_eq!(padded, BoundingBox::new(0, 0, 100, 60));

        let inner = BoundingBox::new(20, 20, 40, 30).padded(5, 100, 60);
        assert_eq!(inner, BoundingBox::new(15, 15, 45, 35));
    }

    #[test]
    fn test_format_kind_serialization() {
        let json = serde_json::to_string(&FormatKind::Mercosul).unwrap();
        assert_eq!(json, "\"mercosul\"");
    }

    #[test]
    fn test_plate_detection_omits_missing_known_plate() {
        let detection = PlateDetection {
            index: 1,
            bounding_box: BoundingBox::new(0, 0, 10, 10),
            confidence: 0.9,
            text: "ABC1234".to_string(),
            text_confidence: 0.8,
            formatted_text: "ABC-1234".to_string(),
            is_valid: true,
            format_kind: FormatKind::Legacy,
            known_plate: None,
            similarity: 0.0,
        };

        let value = serde_json::to_value(&detection).unwrap();
        assert!(value.get("known_plate").is_none());
        assert_eq!(value["format_kind"], "legacy");
    }

    #[test]
    fn test_entry_mean_confidence() {
        let entry = OcrEntry {
            method: "grayscale".to_string(),
            threshold: 0.3,
            text: "ABC123".to_string(),
            details: vec![OcrCandidate::new("ABC", 0.9), OcrCandidate::new("123", 0.5)],
        };
        assert!((entry.mean_confidence() - 0.7).abs() < 1e-6);
    }
}
