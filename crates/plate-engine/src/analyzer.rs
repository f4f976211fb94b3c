//! Recognition pipeline shared by live streams and uploaded images.

use crate::cache::{CacheSettings, DetectionCache};
use crate::config::{DetectorBackend, EngineConfig};
use crate::matcher::{InMemoryRegistry, KnownPlateMatcher, KnownPlateRegistry};
use crate::ocr::{OcrAggregator, OcrMode};
use crate::plugin::mock::{MockPlateDetector, MockTextRecognizer};
use crate::plugin::onnx::{OnnxPlateDetector, OnnxTextRecognizer};
use crate::plugin::{DetectionCandidate, PlateDetector, TextRecognizer};
use anyhow::Result;
use common::plates::{MatchResult, OcrResult, PlateDetection, PlateReport, ValidatedPlate};
use common::validation::PlateFormatValidator;
use image::RgbImage;
use std::sync::Arc;

/// Which registry threshold applies to a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPurpose {
    Stream,
    Upload,
}

/// OCR outcome for one candidate, with its format classification
#[derive(Debug, Clone)]
pub struct PlateReading {
    pub ocr: OcrResult,
    pub validated: ValidatedPlate,
}

impl PlateReading {
    pub fn text(&self) -> &str {
        &self.ocr.best_text
    }
}

pub struct PlateEngine {
    detector: Arc<dyn PlateDetector>,
    recognizer_id: &'static str,
    ocr: OcrAggregator,
    validator: PlateFormatValidator,
    registry: Arc<dyn KnownPlateRegistry>,
    stream_matcher: KnownPlateMatcher,
    upload_matcher: KnownPlateMatcher,
    cache_settings: CacheSettings,
}

impl PlateEngine {
    pub fn new(
        detector: Arc<dyn PlateDetector>,
        recognizer: Arc<dyn TextRecognizer>,
        registry: Arc<dyn KnownPlateRegistry>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            detector,
            recognizer_id: recognizer.id(),
            ocr: OcrAggregator::new(recognizer, config.ocr.clone()),
            validator: PlateFormatValidator::new(),
            registry,
            stream_matcher: KnownPlateMatcher::new(config.stream_match_threshold),
            upload_matcher: KnownPlateMatcher::new(config.upload_match_threshold),
            cache_settings: config.cache.clone(),
        }
    }

    /// Load the configured backends and registry
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let (detector, recognizer): (Arc<dyn PlateDetector>, Arc<dyn TextRecognizer>) = match config.backend {
            DetectorBackend::Onnx => (
                Arc::new(OnnxPlateDetector::load(config.onnx.clone())?),
                Arc::new(OnnxTextRecognizer::load(config.onnx.clone())?),
            ),
            DetectorBackend::Mock => {
                tracing::warn!("using mock plate backends, results are synthetic");
                (Arc::new(MockPlateDetector::new()), Arc::new(MockTextRecognizer::new()))
            }
        };

        let registry = match &config.known_plates_path {
            Some(path) => InMemoryRegistry::from_json_file(path)?,
            None => {
                tracing::info!("no known plates file configured, registry is empty");
                InMemoryRegistry::default()
            }
        };

        Ok(Self::new(detector, recognizer, Arc::new(registry), config))
    }

    pub fn detector_id(&self) -> &'static str {
        self.detector.id()
    }

    pub fn recognizer_id(&self) -> &'static str {
        self.recognizer_id
    }

    pub fn is_healthy(&self) -> bool {
        self.detector.health_check()
    }

    /// Fresh duplicate cache for a stream of `frame_width` pixel wide frames
    pub fn new_cache(&self, frame_width: u32) -> DetectionCache {
        DetectionCache::for_frame_width(self.cache_settings.clone(), frame_width)
    }

    pub fn detect_candidates(&self, frame: &RgbImage) -> Result<Vec<DetectionCandidate>> {
        self.detector.detect(frame)
    }

    /// Run OCR on one candidate and classify the text
    pub fn read_candidate(&self, candidate: &DetectionCandidate, mode: OcrMode) -> PlateReading {
        let ocr = self.ocr.recognize(&candidate.crop, mode);
        let validated = self.validator.validate(&ocr.best_text);
        PlateReading { ocr, validated }
    }

    /// Look `text` up in the registry; empty text never matches
    pub fn match_plate(&self, text: &str, purpose: MatchPurpose) -> MatchResult {
        if text.is_empty() {
            return MatchResult::no_match(0.0);
        }

        let matcher = match purpose {
            MatchPurpose::Stream => &self.stream_matcher,
            MatchPurpose::Upload => &self.upload_matcher,
        };
        matcher.match_plate(text, self.registry.as_ref())
    }

    /// Detect, read and match every plate in `frame` without deduplication
    pub fn analyze_frame(&self, frame: &RgbImage, mode: OcrMode, purpose: MatchPurpose) -> Result<Vec<PlateReport>> {
        let candidates = self.detect_candidates(frame)?;

        let reports = candidates
            .iter()
            .enumerate()
            .map(|(i, candidate)| {
                let reading = self.read_candidate(candidate, mode);
                let matched = self.match_plate(reading.text(), purpose);
                let detection = plate_detection(i + 1, candidate, &reading, matched);
                PlateReport {
                    detection,
                    ocr_results: reading.ocr.all_candidates,
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            candidates = candidates.len(),
            readable = reports.iter().filter(|r| !r.detection.text.is_empty()).count(),
            "analyzed frame"
        );

        Ok(reports)
    }

    /// Thorough analysis of an uploaded image
    pub fn analyze_image(&self, image: &RgbImage) -> Result<Vec<PlateReport>> {
        self.analyze_frame(image, OcrMode::Thorough, MatchPurpose::Upload)
    }
}

/// Assemble the client payload for one plate
pub fn plate_detection(
    index: usize,
    candidate: &DetectionCandidate,
    reading: &PlateReading,
    matched: MatchResult,
) -> PlateDetection {
    PlateDetection {
        index,
        bounding_box: candidate.bbox,
        confidence: candidate.confidence,
        text: reading.ocr.best_text.clone(),
        text_confidence: reading.ocr.best_confidence,
        formatted_text: reading.validated.formatted_text.clone(),
        is_valid: reading.validated.is_valid,
        format_kind: reading.validated.format_kind,
        known_plate: matched.matched,
        similarity: matched.similarity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::plates::{FormatKind, KnownPlateRecord};

    fn engine(text: &str, known: &[&str]) -> PlateEngine {
        let registry = InMemoryRegistry::new(
            known
                .iter()
                .map(|p| KnownPlateRecord {
                    plate_number: p.to_string(),
                    is_regularized: true,
                })
                .collect(),
        );
        PlateEngine::new(
            Arc::new(MockPlateDetector::new()),
            Arc::new(MockTextRecognizer::fixed(text, 0.9)),
            Arc::new(registry),
            &EngineConfig::default(),
        )
    }

    #[test]
    fn test_analyze_image_reports_plate() {
        let engine = engine("ABC1234", &["ABC1234"]);
        let reports = engine.analyze_image(&RgbImage::new(640, 480)).unwrap();

        assert_eq!(reports.len(), 1);
        let detection = &reports[0].detection;
        assert_eq!(detection.index, 1);
        assert_eq!(detection.text, "ABC1234");
        assert_eq!(detection.formatted_text, "ABC-1234");
        assert_eq!(detection.format_kind, FormatKind::Legacy);
        assert!(detection.is_known());
        assert_eq!(detection.similarity, 100.0);
        // 8 variants x 3 thresholds
        assert_eq!(reports[0].ocr_results.len(), 24);
    }

    #[test]
    fn test_thresholds_differ_by_purpose() {
        // ABC1234 vs AXY1Z34: 3 of 7 characters differ, similarity ~57
        let engine = engine("AXY1Z34", &["ABC1234"]);

        assert!(!engine.match_plate("AXY1Z34", MatchPurpose::Stream).is_match());
        assert!(engine.match_plate("AXY1Z34", MatchPurpose::Upload).is_match());
    }

    #[test]
    fn test_empty_text_never_matches() {
        let engine = engine("ABC1234", &[""]);
        let result = engine.match_plate("", MatchPurpose::Upload);
        assert_eq!(result, MatchResult::no_match(0.0));
    }

    #[test]
    fn test_unknown_format_reported_invalid() {
        let engine = engine("AB12", &[]);
        let reports = engine
            .analyze_frame(&RgbImage::new(320, 240), OcrMode::Fast, MatchPurpose::Stream)
            .unwrap();

        let detection = &reports[0].detection;
        assert!(!detection.is_valid);
        assert_eq!(detection.format_kind, FormatKind::Unknown);
        assert!(!detection.is_known());
    }
}
