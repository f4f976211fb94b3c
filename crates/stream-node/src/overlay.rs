//! Drawing of plate boxes and labels on delivered frames.

use ab_glyph::{FontArc, PxScale};
use common::plates::PlateDetection;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{info, warn};

const VALID_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const INVALID_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

const LABEL_SCALE: f32 = 18.0;
const LABEL_PADDING: u32 = 4;

/// Glyph box used to size the label bar when no font is loaded
const FALLBACK_GLYPH: (u32, u32) = (9, 14);

/// DejaVu Sans Mono Bold, see `assets/DejaVu-LICENSE`
static BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono-Bold.ttf");

pub struct OverlayRenderer {
    font: Option<FontArc>,
    scale: PxScale,
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::bundled()
    }
}

impl OverlayRenderer {
    /// Renderer drawing boxes and empty label bars
    pub fn without_font() -> Self {
        Self {
            font: None,
            scale: PxScale::from(LABEL_SCALE),
        }
    }

    /// Renderer using the font compiled into the binary
    pub fn bundled() -> Self {
        match FontArc::try_from_slice(BUNDLED_FONT) {
            Ok(font) => Self::with_font(font),
            Err(e) => {
                warn!(error = %e, "bundled overlay font is invalid, labels disabled");
                Self::without_font()
            }
        }
    }

    /// Load the label font from `path`, falling back to the bundled font
    pub fn from_font_path(path: Option<&str>) -> Self {
        let Some(path) = path else {
            return Self::bundled();
        };

        let font = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontArc::try_from_vec(bytes).map_err(|e| e.to_string()));

        match font {
            Ok(font) => {
                info!(path = %path, "loaded overlay font");
                Self::with_font(font)
            }
            Err(e) => {
                warn!(path = %path, error = %e, "overlay font unavailable, using bundled font");
                Self::bundled()
            }
        }
    }

    fn with_font(font: FontArc) -> Self {
        Self {
            font: Some(font),
            scale: PxScale::from(LABEL_SCALE),
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw every plate onto `frame`
    pub fn draw(&self, frame: &mut RgbImage, plates: &[PlateDetection]) {
        for plate in plates {
            self.draw_plate(frame, plate);
        }
    }

    fn draw_plate(&self, frame: &mut RgbImage, plate: &PlateDetection) {
        let bbox = plate.bounding_box.clamped(frame.width(), frame.height());
        if !bbox.is_valid() {
            return;
        }

        let color = box_color(plate);
        let (width, height) = (bbox.width() as u32, bbox.height() as u32);

        // Two pixel outline
        draw_hollow_rect_mut(frame, Rect::at(bbox.x1, bbox.y1).of_size(width, height), color);
        if width > 2 && height > 2 {
            draw_hollow_rect_mut(
                frame,
                Rect::at(bbox.x1 + 1, bbox.y1 + 1).of_size(width - 2, height - 2),
                color,
            );
        }

        let label = label_text(plate);
        let (text_w, text_h) = match &self.font {
            Some(font) => text_size(self.scale, font, &label),
            None => (
                FALLBACK_GLYPH.0 * label.chars().count() as u32,
                FALLBACK_GLYPH.1,
            ),
        };
        let bar_w = text_w + 2 * LABEL_PADDING;
        let bar_h = text_h + 2 * LABEL_PADDING;

        // Above the box, or just inside the bottom edge when there is no room
        let bar_y = if bbox.y1 >= bar_h as i32 {
            bbox.y1 - bar_h as i32
        } else {
            bbox.y2
        };
        draw_filled_rect_mut(frame, Rect::at(bbox.x1, bar_y).of_size(bar_w, bar_h), color);

        if let Some(font) = &self.font {
            draw_text_mut(
                frame,
                TEXT_COLOR,
                bbox.x1 + LABEL_PADDING as i32,
                bar_y + LABEL_PADDING as i32,
                self.scale,
                font,
                &label,
            );
        }
    }
}

/// Green for valid or known plates, red otherwise
pub fn box_color(plate: &PlateDetection) -> Rgb<u8> {
    if plate.is_valid || plate.is_known() {
        VALID_COLOR
    } else {
        INVALID_COLOR
    }
}

/// `"{text} ({confidence:.1}%)"`, preferring the formatted text of valid plates
pub fn label_text(plate: &PlateDetection) -> String {
    let text = if plate.is_valid {
        plate.formatted_text.as_str()
    } else if plate.text.is_empty() {
        "N/A"
    } else {
        plate.text.as_str()
    };
    format!("{} ({:.1}%)", text, plate.text_confidence * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::plates::{BoundingBox, FormatKind, KnownPlateRecord};

    fn plate(valid: bool, known: bool) -> PlateDetection {
        PlateDetection {
            index: 1,
            bounding_box: BoundingBox::new(100, 100, 200, 140),
            confidence: 0.9,
            text: "ABC1234".to_string(),
            text_confidence: 0.876,
            formatted_text: if valid { "ABC-1234" } else { "ABC1234" }.to_string(),
            is_valid: valid,
            format_kind: if valid { FormatKind::Legacy } else { FormatKind::Unknown },
            known_plate: known.then(|| KnownPlateRecord {
                plate_number: "ABC1234".to_string(),
                is_regularized: true,
            }),
            similarity: if known { 100.0 } else { 0.0 },
        }
    }

    #[test]
    fn test_label_text() {
        assert_eq!(label_text(&plate(true, false)), "ABC-1234 (87.6%)");
        assert_eq!(label_text(&plate(false, false)), "ABC1234 (87.6%)");

        let mut unread = plate(false, false);
        unread.text.clear();
        unread.text_confidence = 0.0;
        assert_eq!(label_text(&unread), "N/A (0.0%)");
    }

    #[test]
    fn test_box_color() {
        assert_eq!(box_color(&plate(true, false)), VALID_COLOR);
        assert_eq!(box_color(&plate(false, true)), VALID_COLOR);
        assert_eq!(box_color(&plate(false, false)), INVALID_COLOR);
    }

    #[test]
    fn test_draw_outlines_box_and_bar() {
        let renderer = OverlayRenderer::without_font();
        let mut frame = RgbImage::new(320, 240);
        renderer.draw(&mut frame, &[plate(false, false)]);

        assert_eq!(*frame.get_pixel(100, 120), INVALID_COLOR);
        assert_eq!(*frame.get_pixel(150, 120), Rgb([0, 0, 0]));
        // Label bar sits above the box
        assert_eq!(*frame.get_pixel(102, 90), INVALID_COLOR);
    }

    #[test]
    fn test_label_moves_below_when_no_room() {
        let renderer = OverlayRenderer::without_font();
        let mut frame = RgbImage::new(320, 240);
        let mut top = plate(true, false);
        top.bounding_box = BoundingBox::new(10, 2, 110, 40);
        renderer.draw(&mut frame, &[top]);

        assert_eq!(*frame.get_pixel(12, 45), VALID_COLOR);
    }

    #[test]
    fn test_missing_font_falls_back_to_bundled() {
        let renderer = OverlayRenderer::from_font_path(Some("/nonexistent/font.ttf"));
        assert!(renderer.has_font());
        assert!(OverlayRenderer::from_font_path(None).has_font());
    }

    fn dark_pixels_in_bar(renderer: &OverlayRenderer) -> usize {
        let mut frame = RgbImage::from_pixel(320, 240, Rgb([255, 255, 255]));
        let mut plate = plate(true, false);
        plate.bounding_box = BoundingBox::new(100, 120, 260, 160);
        renderer.draw(&mut frame, &[plate]);

        // Only label glyphs are dark on a white frame with a green bar
        let mut dark = 0;
        for y in 92..120 {
            for x in 100..260 {
                let px = frame.get_pixel(x, y);
                if px[1] < 100 && px[0] < 100 {
                    dark += 1;
                }
            }
        }
        dark
    }

    #[test]
    fn test_default_renderer_writes_label_text() {
        let renderer = OverlayRenderer::default();
        assert!(renderer.has_font());
        assert!(dark_pixels_in_bar(&renderer) > 20);
    }

    #[test]
    fn test_fontless_renderer_leaves_bar_blank() {
        assert_eq!(dark_pixels_in_bar(&OverlayRenderer::without_font()), 0);
    }
}
