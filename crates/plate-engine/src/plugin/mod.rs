//! Detector and recognizer backends.
//!
//! The recognition pipeline only depends on the two traits below. Model
//! backed implementations live in [`onnx`], deterministic ones for demos and
//! tests in [`mock`].

pub mod mock;
pub mod onnx;

use anyhow::Result;
use common::plates::{BoundingBox, OcrCandidate};
use image::{DynamicImage, RgbImage};

/// A plate region found by a detector on one frame
#[derive(Debug, Clone)]
pub struct DetectionCandidate {
    /// Region in frame coordinates (unpadded)
    pub bbox: BoundingBox,

    /// Detector confidence (0.0 to 1.0)
    pub confidence: f32,

    /// Padded crop of the region, ready for OCR
    pub crop: RgbImage,
}

/// Locates plate regions in a frame
///
/// Implementations must not mutate the frame and return an empty list, not an
/// error, when nothing is found. Calls are synchronous and always made from a
/// stream worker thread or a blocking task.
pub trait PlateDetector: Send + Sync {
    /// Unique backend identifier (e.g., "onnx_yolo")
    fn id(&self) -> &'static str;

    fn detect(&self, frame: &RgbImage) -> Result<Vec<DetectionCandidate>>;

    /// Whether the backend is able to serve requests
    fn health_check(&self) -> bool {
        true
    }
}

/// Extracts text candidates from a cropped plate image
///
/// Degenerate input (empty or tiny images) yields an empty list.
pub trait TextRecognizer: Send + Sync {
    /// Unique backend identifier (e.g., "onnx_ctc")
    fn id(&self) -> &'static str;

    fn read_text(&self, image: &DynamicImage) -> Result<Vec<OcrCandidate>>;

    fn health_check(&self) -> bool {
        true
    }
}

/// Crop `bbox` grown by `padding` pixels out of `frame`
///
/// Returns `None` when the clipped region is empty.
pub fn crop_region(frame: &RgbImage, bbox: &BoundingBox, padding: u32) -> Option<RgbImage> {
    let region = bbox.padded(padding, frame.width(), frame.height());
    if !region.is_valid() {
        return None;
    }

    let crop = image::imageops::crop_imm(
        frame,
        region.x1 as u32,
        region.y1 as u32,
        region.width() as u32,
        region.height() as u32,
    )
    .to_image();

    Some(crop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_region_applies_padding() {
        let frame = RgbImage::new(100, 50);
        let crop = crop_region(&frame, &BoundingBox::new(10, 10, 30, 20), 5).unwrap();
        assert_eq!(crop.dimensions(), (30, 20));
    }

    #[test]
    fn test_crop_region_clips_to_frame() {
        let frame = RgbImage::new(100, 50);
        let crop = crop_region(&frame, &BoundingBox::new(90, 40, 120, 70), 5).unwrap();
        assert_eq!(crop.dimensions(), (15, 15));
    }

    #[test]
    fn test_crop_region_outside_frame_is_none() {
        let frame = RgbImage::new(100, 50);
        assert!(crop_region(&frame, &BoundingBox::new(200, 200, 220, 210), 0).is_none());
    }
}
