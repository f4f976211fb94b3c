//! Multi-variant OCR aggregation.
//!
//! A cropped plate is read once per preprocessing variant, the raw readings
//! are filtered at several confidence thresholds and the best combined text
//! is selected: longer text first, then higher mean confidence, then the
//! first one found.

use crate::plugin::TextRecognizer;
use crate::preprocess::{to_grayscale, PreprocessVariant};
use common::plates::{OcrCandidate, OcrEntry, OcrResult};
use image::RgbImage;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrMode {
    /// Grayscale only, single recognizer call; used on live streams
    Fast,
    /// Every preprocessing variant at every threshold; used on uploads
    Thorough,
}

#[derive(Debug, Clone)]
pub struct OcrSettings {
    /// Thresholds applied in thorough mode (inclusive)
    pub thresholds: Vec<f32>,

    /// Minimum confidence kept in fast mode (exclusive)
    pub fast_min_confidence: f32,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            thresholds: vec![0.3, 0.5, 0.7],
            fast_min_confidence: 0.3,
        }
    }
}

pub struct OcrAggregator {
    recognizer: Arc<dyn TextRecognizer>,
    settings: OcrSettings,
}

impl OcrAggregator {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, settings: OcrSettings) -> Self {
        Self {
            recognizer,
            settings,
        }
    }

    pub fn recognize(&self, crop: &RgbImage, mode: OcrMode) -> OcrResult {
        if crop.width() == 0 || crop.height() == 0 {
            return OcrResult::empty();
        }

        let entries = match mode {
            OcrMode::Fast => self.read_fast(crop),
            OcrMode::Thorough => self.read_thorough(crop),
        };

        select_best(entries)
    }

    fn read_fast(&self, crop: &RgbImage) -> Vec<OcrEntry> {
        let gray = to_grayscale(crop);
        let variant = PreprocessVariant::Grayscale;
        let Some(readings) = self.read_variant(variant, crop, &gray) else {
            return Vec::new();
        };

        readings
            .into_iter()
            .filter(|reading| reading.confidence > self.settings.fast_min_confidence)
            .filter_map(|reading| {
                let text = clean_text(&reading.text);
                if text.is_empty() {
                    return None;
                }
                let candidate = OcrCandidate::new(text.clone(), reading.confidence);
                Some(OcrEntry {
                    method: variant.name().to_string(),
                    threshold: self.settings.fast_min_confidence,
                    text,
                    details: vec![candidate],
                })
            })
            .collect()
    }

    fn read_thorough(&self, crop: &RgbImage) -> Vec<OcrEntry> {
        let gray = to_grayscale(crop);
        let mut entries = Vec::new();

        for variant in PreprocessVariant::ALL {
            let Some(readings) = self.read_variant(variant, crop, &gray) else {
                continue;
            };

            for &threshold in &self.settings.thresholds {
                if let Some(entry) = combine_at_threshold(variant.name(), threshold, &readings) {
                    entries.push(entry);
                }
            }
        }

        entries
    }

    fn read_variant(
        &self,
        variant: PreprocessVariant,
        crop: &RgbImage,
        gray: &image::GrayImage,
    ) -> Option<Vec<OcrCandidate>> {
        let image = variant.apply(crop, gray);
        match self.recognizer.read_text(&image) {
            Ok(readings) => Some(readings),
            Err(e) => {
                tracing::warn!(
                    method = variant.name(),
                    recognizer = self.recognizer.id(),
                    error = %e,
                    "OCR variant failed, skipping"
                );
                None
            }
        }
    }
}

/// Keep readings at or above `threshold`, cleaned and ordered by confidence
fn combine_at_threshold(method: &str, threshold: f32, readings: &[OcrCandidate]) -> Option<OcrEntry> {
    let mut details: Vec<OcrCandidate> = readings
        .iter()
        .filter(|reading| reading.confidence >= threshold)
        .filter_map(|reading| {
            let text = clean_text(&reading.text);
            (!text.is_empty()).then(|| OcrCandidate::new(text, reading.confidence))
        })
        .collect();

    if details.is_empty() {
        return None;
    }

    // Stable sort keeps recognizer order among equal confidences
    details.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let text = details.iter().map(|d| d.text.as_str()).collect();

    Some(OcrEntry {
        method: method.to_string(),
        threshold,
        text,
        details,
    })
}

fn clean_text(text: &str) -> String {
    text.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Pick the winning entry and wrap everything into an [`OcrResult`]
pub fn select_best(entries: Vec<OcrEntry>) -> OcrResult {
    let mut best_text = String::new();
    let mut best_len = 0;
    let mut best_confidence = 0.0f32;

    for entry in entries.iter().filter(|e| !e.details.is_empty()) {
        let len = entry.text.chars().count();
        let confidence = entry.mean_confidence();
        if len > best_len || (len == best_len && confidence > best_confidence) {
            best_text = entry.text.clone();
            best_len = len;
            best_confidence = confidence;
        }
    }

    OcrResult {
        best_text,
        best_confidence,
        all_candidates: entries,
    }
}
