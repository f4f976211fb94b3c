/// ONNX Runtime backed plate detector and text recognizer
///
/// Two independent models are used:
/// 1. Detection: a YOLOv8 single-class plate detector
/// 2. Recognition: a CRNN/LSTM text model decoded with greedy CTC
use super::{crop_region, DetectionCandidate, PlateDetector, TextRecognizer};
use anyhow::{anyhow, Context, Result};
use common::plates::{BoundingBox, OcrCandidate};
use image::{DynamicImage, RgbImage};
use ndarray::{Array, IxDyn};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnnxConfig {
    /// Path to the license plate detection ONNX model file
    pub detection_model_path: String,

    /// Path to the OCR ONNX model file
    pub ocr_model_path: String,

    /// Confidence threshold for plate detections (0.0 to 1.0)
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,

    /// IoU (Intersection over Union) threshold for NMS
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    /// Maximum number of plates to detect per frame
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,

    /// Detection model input size (width and height)
    #[serde(default = "default_detection_input_size")]
    pub detection_input_size: u32,

    /// OCR model input width
    #[serde(default = "default_ocr_input_width")]
    pub ocr_input_width: u32,

    /// OCR model input height
    #[serde(default = "default_ocr_input_height")]
    pub ocr_input_height: u32,

    /// Character vocabulary for OCR (CTC blank is index 0, not listed)
    #[serde(default = "default_char_vocab")]
    pub char_vocab: String,

    /// Pixels added around each detected box before cropping
    #[serde(default = "default_crop_padding")]
    pub crop_padding: u32,

    /// Execution provider preference (CPU, CUDA, TensorRT)
    #[serde(default = "default_execution_provider")]
    pub execution_provider: String,

    /// GPU device ID (0, 1, 2, etc.)
    #[serde(default)]
    pub device_id: i32,

    /// Number of intra-operation threads
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,

    /// Number of inter-operation threads
    #[serde(default = "default_inter_threads")]
    pub inter_threads: usize,
}

fn default_confidence() -> f32 {
    0.5
}

fn default_iou_threshold() -> f32 {
    0.4
}

fn default_max_detections() -> usize {
    10
}

fn default_detection_input_size() -> u32 {
    640
}

fn default_ocr_input_width() -> u32 {
    200
}

fn default_ocr_input_height() -> u32 {
    64
}

fn default_char_vocab() -> String {
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ".to_string()
}

fn default_crop_padding() -> u32 {
    5
}

fn default_execution_provider() -> String {
    "CUDA".to_string()
}

fn default_intra_threads() -> usize {
    4
}

fn default_inter_threads() -> usize {
    1
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            detection_model_path: "models/plate_detector.onnx".to_string(),
            ocr_model_path: "models/plate_ocr.onnx".to_string(),
            confidence_threshold: default_confidence(),
            iou_threshold: default_iou_threshold(),
            max_detections: default_max_detections(),
            detection_input_size: default_detection_input_size(),
            ocr_input_width: default_ocr_input_width(),
            ocr_input_height: default_ocr_input_height(),
            char_vocab: default_char_vocab(),
            crop_padding: default_crop_padding(),
            execution_provider: default_execution_provider(),
            device_id: 0,
            intra_threads: default_intra_threads(),
            inter_threads: default_inter_threads(),
        }
    }
}

/// YOLOv8 plate detector
pub struct OnnxPlateDetector {
    config: OnnxConfig,
    session: Mutex<Session>,
    execution_provider: String,
}

impl OnnxPlateDetector {
    pub fn load(config: OnnxConfig) -> Result<Self> {
        let (session, execution_provider) = create_session(&config, &config.detection_model_path)?;

        tracing::info!(
            path = %config.detection_model_path,
            provider = %execution_provider,
            device = config.device_id,
            "loaded plate detection model"
        );

        Ok(Self {
            config,
            session: Mutex::new(session),
            execution_provider,
        })
    }

    pub fn execution_provider(&self) -> &str {
        &self.execution_provider
    }

    /// Resize to the square model input, convert to NCHW and normalize to [0, 1]
    fn preprocess(&self, frame: &RgbImage) -> Array<f32, IxDyn> {
        let size = self.config.detection_input_size;
        let resized = image::imageops::resize(frame, size, size, image::imageops::FilterType::Triangle);

        let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));
        for (x, y, pixel) in resized.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
            input[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
            input[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
        }

        input
    }

    /// Decode YOLOv8 output `[batch, 5, num_predictions]` into frame boxes
    fn postprocess(&self, output: &Array<f32, IxDyn>, frame_width: u32, frame_height: u32) -> Vec<(BoundingBox, f32)> {
        let scale_x = frame_width as f32 / self.config.detection_input_size as f32;
        let scale_y = frame_height as f32 / self.config.detection_input_size as f32;

        let num_predictions = output.shape().get(2).copied().unwrap_or(0);
        let mut boxes = Vec::new();

        for i in 0..num_predictions {
            let confidence = output[[0, 4, i]];
            if confidence < self.config.confidence_threshold {
                continue;
            }

            let cx = output[[0, 0, i]];
            let cy = output[[0, 1, i]];
            let w = output[[0, 2, i]];
            let h = output[[0, 3, i]];

            let bbox = BoundingBox::new(
                ((cx - w / 2.0) * scale_x) as i32,
                ((cy - h / 2.0) * scale_y) as i32,
                ((cx + w / 2.0) * scale_x) as i32,
                ((cy + h / 2.0) * scale_y) as i32,
            )
            .clamped(frame_width, frame_height);

            if bbox.is_valid() {
                boxes.push((bbox, confidence));
            }
        }

        let mut kept = nms(boxes, self.config.iou_threshold);
        kept.truncate(self.config.max_detections);
        kept
    }
}

impl PlateDetector for OnnxPlateDetector {
    fn id(&self) -> &'static str {
        "onnx_yolo"
    }

    fn detect(&self, frame: &RgbImage) -> Result<Vec<DetectionCandidate>> {
        let input_tensor = Value::from_array(self.preprocess(frame))?;

        let output = {
            let mut session = self
                .session
                .lock()
                .map_err(|e| anyhow!("Failed to lock detection session: {}", e))?;
            let outputs = session.run(ort::inputs![input_tensor])?;

            // Different exports name the output differently
            let output_value = outputs
                .get("output0")
                .or_else(|| outputs.get("output"))
                .or_else(|| outputs.get("boxes"))
                .context("No detection output tensor found (tried: output0, output, boxes)")?;
            let (shape, data) = output_value.try_extract_tensor::<f32>()?;
            let shape_usize: Vec<usize> = shape.as_ref().iter().map(|&x| x as usize).collect();
            Array::from_shape_vec(IxDyn(&shape_usize), data.to_vec())?
        };

        let candidates = self
            .postprocess(&output, frame.width(), frame.height())
            .into_iter()
            .filter_map(|(bbox, confidence)| {
                crop_region(frame, &bbox, self.config.crop_padding).map(|crop| DetectionCandidate {
                    bbox,
                    confidence,
                    crop,
                })
            })
            .collect();

        Ok(candidates)
    }
}

/// CTC text recognizer for cropped plates
pub struct OnnxTextRecognizer {
    config: OnnxConfig,
    session: Mutex<Session>,
}

impl OnnxTextRecognizer {
    pub fn load(config: OnnxConfig) -> Result<Self> {
        let (session, provider) = create_session(&config, &config.ocr_model_path)?;

        tracing::info!(
            path = %config.ocr_model_path,
            provider = %provider,
            "loaded plate OCR model"
        );

        Ok(Self {
            config,
            session: Mutex::new(session),
        })
    }

    /// Resize to the model input, convert to single-channel NCHW in [0, 1]
    fn preprocess(&self, image: &DynamicImage) -> Array<f32, IxDyn> {
        let width = self.config.ocr_input_width;
        let height = self.config.ocr_input_height;
        let gray = image
            .resize_exact(width, height, image::imageops::FilterType::Triangle)
            .to_luma8();

        let mut input = Array::zeros(IxDyn(&[1, 1, height as usize, width as usize]));
        for (x, y, pixel) in gray.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
        }

        input
    }
}

impl TextRecognizer for OnnxTextRecognizer {
    fn id(&self) -> &'static str {
        "onnx_ctc"
    }

    fn read_text(&self, image: &DynamicImage) -> Result<Vec<OcrCandidate>> {
        if image.width() < 2 || image.height() < 2 {
            return Ok(Vec::new());
        }

        let input_tensor = Value::from_array(self.preprocess(image))?;

        let output = {
            let mut session = self
                .session
                .lock()
                .map_err(|e| anyhow!("Failed to lock OCR session: {}", e))?;
            let outputs = session.run(ort::inputs![input_tensor])?;

            // Expected shape: [batch, sequence_length, vocab_size]
            let output_value = outputs
                .get("output")
                .or_else(|| outputs.get("output0"))
                .or_else(|| outputs.get("logits"))
                .context("No OCR output tensor found (tried: output, output0, logits)")?;
            let (shape, data) = output_value.try_extract_tensor::<f32>()?;
            let shape_usize: Vec<usize> = shape.as_ref().iter().map(|&x| x as usize).collect();
            Array::from_shape_vec(IxDyn(&shape_usize), data.to_vec())?
        };

        let decoded = ctc_decode(&output, &self.config.char_vocab)?;
        Ok(decoded.into_iter().collect())
    }
}

/// Create an ONNX session, falling back along TensorRT → CUDA → CPU
fn create_session(config: &OnnxConfig, model_path: &str) -> Result<(Session, String)> {
    let chain: &[&str] = match config.execution_provider.to_uppercase().as_str() {
        "TENSORRT" => &["TensorRT", "CUDA", "CPU"],
        "CUDA" => &["CUDA", "CPU"],
        _ => &["CPU"],
    };

    let mut last_error = None;
    for provider in chain {
        tracing::info!(model = %model_path, provider = %provider, "creating ONNX session");
        match build_session(config, model_path, provider) {
            Ok(session) => return Ok((session, provider.to_string())),
            Err(e) => {
                tracing::warn!(model = %model_path, provider = %provider, error = %e, "execution provider failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("no execution provider configured")))
}

fn build_session(config: &OnnxConfig, model_path: &str, provider: &str) -> Result<Session> {
    let builder = Session::builder()
        .context("Failed to create session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(config.intra_threads)
        .context("Failed to set intra threads")?
        .with_inter_threads(config.inter_threads)
        .context("Failed to set inter threads")?;

    let builder = match provider {
        "TensorRT" => builder
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(config.device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(config.device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ])
            .context("Failed to set execution providers")?,
        "CUDA" => builder
            .with_execution_providers([
                CUDAExecutionProvider::default()
                    .with_device_id(config.device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ])
            .context("Failed to set execution providers")?,
        _ => builder,
    };

    builder
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load model from {}", model_path))
}

/// Apply Non-Maximum Suppression, highest confidence first
fn nms(mut boxes: Vec<(BoundingBox, f32)>, iou_threshold: f32) -> Vec<(BoundingBox, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<(BoundingBox, f32)> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| iou(&kept.0, &candidate.0) < iou_threshold) {
            keep.push(candidate);
        }
    }

    keep
}

/// Intersection over Union of two boxes
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let intersection = if x2 > x1 && y2 > y1 {
        ((x2 - x1) * (y2 - y1)) as f32
    } else {
        0.0
    };

    let area_a = (a.width() * a.height()) as f32;
    let area_b = (b.width() * b.height()) as f32;
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy CTC decoding
///
/// Returns the decoded text with the mean probability of its emitted
/// characters, or `None` when only blanks were emitted.
fn ctc_decode(output: &Array<f32, IxDyn>, vocab: &str) -> Result<Option<OcrCandidate>> {
    let shape = output.shape();
    if shape.len() != 3 {
        return Err(anyhow!("unexpected OCR output rank {} (expected 3)", shape.len()));
    }
    let sequence_length = shape[1];
    let vocab_size = shape[2];
    let chars: Vec<char> = vocab.chars().collect();

    let mut text = String::new();
    let mut probabilities = Vec::new();
    let mut prev_idx = 0; // CTC blank is index 0

    for t in 0..sequence_length {
        let mut max_prob = output[[0, t, 0]];
        let mut max_idx = 0;

        for c in 1..vocab_size {
            let prob = output[[0, t, c]];
            if prob > max_prob {
                max_prob = prob;
                max_idx = c;
            }
        }

        // Skip blanks and repeats
        if max_idx > 0 && max_idx != prev_idx {
            if let Some(&ch) = chars.get(max_idx - 1) {
                text.push(ch);
                probabilities.push(max_prob.clamp(0.0, 1.0));
            }
        }

        prev_idx = max_idx;
    }

    if text.is_empty() {
        return Ok(None);
    }

    let confidence = probabilities.iter().sum::<f32>() / probabilities.len() as f32;
    Ok(Some(OcrCandidate::new(text, confidence)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OnnxConfig::default();
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.iou_threshold, 0.4);
        assert_eq!(config.max_detections, 10);
        assert_eq!(config.detection_input_size, 640);
        assert_eq!(config.crop_padding, 5);
        assert!(config.char_vocab.contains("0123456789"));
        assert!(config.char_vocab.contains("ABCDEFGHIJKLMNOPQRSTUVWXYZ"));
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: OnnxConfig = serde_json::from_value(serde_json::json!({
            "detection_model_path": "a.onnx",
            "ocr_model_path": "b.onnx",
            "execution_provider": "CPU"
        }))
        .unwrap();
        assert_eq!(config.execution_provider, "CPU");
        assert_eq!(config.max_detections, 10);
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(10, 10, 60, 30);
        let b = BoundingBox::new(30, 15, 80, 35);

        let overlap = iou(&a, &b);
        assert!(overlap > 0.0 && overlap < 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 0.001);
        assert_eq!(iou(&a, &BoundingBox::new(100, 100, 150, 120)), 0.0);
    }

    #[test]
    fn test_nms() {
        let boxes = vec![
            (BoundingBox::new(10, 10, 110, 40), 0.9),
            (BoundingBox::new(15, 12, 115, 42), 0.8),
            (BoundingBox::new(200, 200, 300, 230), 0.85),
        ];

        let filtered = nms(boxes, 0.4);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].1, 0.9);
        assert_eq!(filtered[1].1, 0.85);
    }

    #[test]
    fn test_ctc_decode() {
        let vocab = default_char_vocab();
        let vocab_size = vocab.len() + 1;
        let sequence_length = 6;
        let mut data = vec![0.01f32; sequence_length * vocab_size];

        data[0] = 0.9; // t=0 blank
        data[vocab_size + 11] = 0.9; // t=1 'A'
        data[2 * vocab_size + 11] = 0.8; // t=2 'A' repeated, collapsed
        data[3 * vocab_size + 12] = 0.7; // t=3 'B'
        data[4 * vocab_size + 2] = 0.6; // t=4 '1'
        data[5 * vocab_size] = 0.9; // t=5 blank

        let output = Array::from_shape_vec(IxDyn(&[1, sequence_length, vocab_size]), data).unwrap();
        let candidate = ctc_decode(&output, &vocab).unwrap().unwrap();

        assert_eq!(candidate.text, "AB1");
        assert!((candidate.confidence - (0.9 + 0.7 + 0.6) / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_ctc_decode_only_blanks() {
        let vocab = default_char_vocab();
        let vocab_size = vocab.len() + 1;
        let mut data = vec![0.0f32; 3 * vocab_size];
        for t in 0..3 {
            data[t * vocab_size] = 1.0;
        }
        let output = Array::from_shape_vec(IxDyn(&[1, 3, vocab_size]), data).unwrap();
        assert!(ctc_decode(&output, &vocab).unwrap().is_none());
    }

    #[test]
    fn test_missing_model_fails_to_load() {
        let config = OnnxConfig {
            detection_model_path: "models/does_not_exist.onnx".to_string(),
            execution_provider: "CPU".to_string(),
            ..OnnxConfig::default()
        };
        assert!(OnnxPlateDetector::load(config).is_err());
    }
}
