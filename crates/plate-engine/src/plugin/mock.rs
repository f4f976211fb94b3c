/// Deterministic plate backends for demos and tests
use super::{crop_region, DetectionCandidate, PlateDetector, TextRecognizer};
use anyhow::Result;
use common::plates::{BoundingBox, OcrCandidate};
use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Plate region as a fraction of the frame size
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,

    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockDetectorConfig {
    /// Regions reported on every frame
    #[serde(default = "default_regions")]
    pub regions: Vec<MockRegion>,

    /// Simulate processing delay in milliseconds
    #[serde(default)]
    pub simulated_delay_ms: u64,
}

fn default_confidence() -> f32 {
    0.9
}

fn default_regions() -> Vec<MockRegion> {
    vec![MockRegion {
        x: 0.375,
        y: 0.625,
        width: 0.25,
        height: 0.125,
        confidence: default_confidence(),
    }]
}

impl Default for MockDetectorConfig {
    fn default() -> Self {
        Self {
            regions: default_regions(),
            simulated_delay_ms: 0,
        }
    }
}

/// Reports the configured regions on every frame
pub struct MockPlateDetector {
    config: MockDetectorConfig,
}

impl MockPlateDetector {
    pub fn new() -> Self {
        Self::with_config(MockDetectorConfig::default())
    }

    pub fn with_config(config: MockDetectorConfig) -> Self {
        Self { config }
    }
}

impl Default for MockPlateDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PlateDetector for MockPlateDetector {
    fn id(&self) -> &'static str {
        "mock_plate_detector"
    }

    fn detect(&self, frame: &RgbImage) -> Result<Vec<DetectionCandidate>> {
        if self.config.simulated_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.config.simulated_delay_ms));
        }

        let (width, height) = (frame.width() as f32, frame.height() as f32);
        let candidates = self
            .config
            .regions
            .iter()
            .filter_map(|region| {
                let bbox = BoundingBox::new(
                    (region.x * width) as i32,
                    (region.y * height) as i32,
                    ((region.x + region.width) * width) as i32,
                    ((region.y + region.height) * height) as i32,
                )
                .clamped(frame.width(), frame.height());

                if !bbox.is_valid() {
                    return None;
                }
                crop_region(frame, &bbox, 5).map(|crop| DetectionCandidate {
                    bbox,
                    confidence: region.confidence,
                    crop,
                })
            })
            .collect();

        Ok(candidates)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockRecognizerConfig {
    /// Candidates returned for every non-empty image
    #[serde(default = "default_readings")]
    pub readings: Vec<OcrCandidate>,
}

fn default_readings() -> Vec<OcrCandidate> {
    vec![OcrCandidate::new("ABC1234", 0.92)]
}

impl Default for MockRecognizerConfig {
    fn default() -> Self {
        Self {
            readings: default_readings(),
        }
    }
}

/// Returns the configured readings for any non-empty image
pub struct MockTextRecognizer {
    config: MockRecognizerConfig,
}

impl MockTextRecognizer {
    pub fn new() -> Self {
        Self::with_config(MockRecognizerConfig::default())
    }

    pub fn with_config(config: MockRecognizerConfig) -> Self {
        Self { config }
    }

    /// Recognizer that always reads `text` with `confidence`
    pub fn fixed(text: impl Into<String>, confidence: f32) -> Self {
        Self::with_config(MockRecognizerConfig {
            readings: vec![OcrCandidate::new(text, confidence)],
        })
    }
}

impl Default for MockTextRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextRecognizer for MockTextRecognizer {
    fn id(&self) -> &'static str {
        "mock_text_recognizer"
    }

    fn read_text(&self, image: &DynamicImage) -> Result<Vec<OcrCandidate>> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        Ok(self.config.readings.clone())
    }
}
