//! Image variants fed to the text recognizer.
//!
//! Every variant except [`PreprocessVariant::Original`] is derived from the
//! grayscale crop.

use image::{imageops, DynamicImage, GrayImage, Luma, RgbImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreprocessVariant {
    Original,
    Grayscale,
    Otsu,
    Adaptive,
    Bilateral,
    Sharpened,
    Resized2x,
    Inverted,
}

impl PreprocessVariant {
    /// Variants in the order they are tried in thorough mode
    pub const ALL: [PreprocessVariant; 8] = [
        PreprocessVariant::Original,
        PreprocessVariant::Grayscale,
        PreprocessVariant::Otsu,
        PreprocessVariant::Adaptive,
        PreprocessVariant::Bilateral,
        PreprocessVariant::Sharpened,
        PreprocessVariant::Resized2x,
        PreprocessVariant::Inverted,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PreprocessVariant::Original => "original",
            PreprocessVariant::Grayscale => "grayscale",
            PreprocessVariant::Otsu => "otsu",
            PreprocessVariant::Adaptive => "adaptive",
            PreprocessVariant::Bilateral => "bilateral",
            PreprocessVariant::Sharpened => "sharpened",
            PreprocessVariant::Resized2x => "resized_2x",
            PreprocessVariant::Inverted => "inverted",
        }
    }

    /// Produce this variant of `crop`; `gray` must be the grayscale crop
    pub fn apply(&self, crop: &RgbImage, gray: &GrayImage) -> DynamicImage {
        match self {
            PreprocessVariant::Original => DynamicImage::ImageRgb8(crop.clone()),
            PreprocessVariant::Grayscale => DynamicImage::ImageLuma8(gray.clone()),
            PreprocessVariant::Otsu => DynamicImage::ImageLuma8(otsu_binarize(gray)),
            PreprocessVariant::Adaptive => DynamicImage::ImageLuma8(adaptive_binarize(gray)),
            PreprocessVariant::Bilateral => {
                DynamicImage::ImageLuma8(bilateral_filter(gray, BILATERAL_WINDOW, 17.0, 17.0))
            }
            PreprocessVariant::Sharpened => DynamicImage::ImageLuma8(sharpen(gray)),
            PreprocessVariant::Resized2x => DynamicImage::ImageLuma8(imageops::resize(
                gray,
                gray.width() * 2,
                gray.height() * 2,
                imageops::FilterType::CatmullRom,
            )),
            PreprocessVariant::Inverted => {
                let mut inverted = gray.clone();
                imageops::invert(&mut inverted);
                DynamicImage::ImageLuma8(inverted)
            }
        }
    }
}

const BILATERAL_WINDOW: u32 = 11;

/// Gaussian sigma equivalent to an 11px adaptive threshold block
const ADAPTIVE_SIGMA: f32 = 2.0;

/// Offset subtracted from the local mean before comparing
const ADAPTIVE_OFFSET: i16 = 2;

const SHARPEN_KERNEL: [i32; 9] = [-1, -1, -1, -1, 9, -1, -1, -1, -1];

pub fn to_grayscale(crop: &RgbImage) -> GrayImage {
    imageops::grayscale(crop)
}

/// Global binarization at the Otsu level
fn otsu_binarize(gray: &GrayImage) -> GrayImage {
    let level = imageproc::contrast::otsu_level(gray);
    binarize(gray, |_, _, value| value > level)
}

/// Local binarization against a Gaussian-weighted neighbourhood mean
fn adaptive_binarize(gray: &GrayImage) -> GrayImage {
    let local_mean = imageproc::filter::gaussian_blur_f32(gray, ADAPTIVE_SIGMA);
    binarize(gray, |x, y, value| {
        value as i16 > local_mean.get_pixel(x, y)[0] as i16 - ADAPTIVE_OFFSET
    })
}

fn binarize(gray: &GrayImage, foreground: impl Fn(u32, u32, u8) -> bool) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = gray.get_pixel(x, y)[0];
        if foreground(x, y, value) {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

fn sharpen(gray: &GrayImage) -> GrayImage {
    imageproc::filter::filter3x3::<_, i32, u8>(gray, &SHARPEN_KERNEL)
}

/// Edge-preserving smoothing
///
/// Each output pixel is the average of its `window` x `window` neighbourhood
/// weighted by spatial distance and intensity difference.
fn bilateral_filter(gray: &GrayImage, window: u32, sigma_color: f32, sigma_space: f32) -> GrayImage {
    let radius = (window / 2) as i64;
    let (width, height) = (gray.width() as i64, gray.height() as i64);
    let color_coeff = -0.5 / (sigma_color * sigma_color);
    let space_coeff = -0.5 / (sigma_space * sigma_space);

    let mut spatial = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            spatial.push(((dx * dx + dy * dy) as f32 * space_coeff).exp());
        }
    }

    let color: Vec<f32> = (0..256)
        .map(|d| ((d * d) as f32 * color_coeff).exp())
        .collect();

    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let center = gray.get_pixel(x, y)[0];
        let mut weighted_sum = 0.0f32;
        let mut weight_total = 0.0f32;
        let mut k = 0;

        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx >= 0 && ny >= 0 && nx < width && ny < height {
                    let value = gray.get_pixel(nx as u32, ny as u32)[0];
                    let weight = spatial[k] * color[center.abs_diff(value) as usize];
                    weighted_sum += weight * value as f32;
                    weight_total += weight;
                }
                k += 1;
            }
        }

        if weight_total > 0.0 {
            Luma([(weighted_sum / weight_total).round().clamp(0.0, 255.0) as u8])
        } else {
            Luma([center])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn split_crop() -> RgbImage {
        RgbImage::from_fn(20, 10, |x, _| {
            if x < 10 {
                Rgb([20, 20, 20])
            } else {
                Rgb([230, 230, 230])
            }
        })
    }

    #[test]
    fn test_variant_names() {
        let names: Vec<&str> = PreprocessVariant::ALL.iter().map(|v| v.name()).collect();
        assert_eq!(
            names,
            vec![
                "original",
                "grayscale",
                "otsu",
                "adaptive",
                "bilateral",
                "sharpened",
                "resized_2x",
                "inverted"
            ]
        );
    }

    #[test]
    fn test_original_keeps_color() {
        let crop = split_crop();
        let gray = to_grayscale(&crop);
        let image = PreprocessVariant::Original.apply(&crop, &gray);
        assert!(image.as_rgb8().is_some());
    }

    #[test]
    fn test_otsu_separates_halves() {
        let crop = split_crop();
        let gray = to_grayscale(&crop);
        let binary = PreprocessVariant::Otsu.apply(&crop, &gray).to_luma8();

        assert_eq!(binary.get_pixel(2, 5)[0], 0);
        assert_eq!(binary.get_pixel(17, 5)[0], 255);
    }

    #[test]
    fn test_resized_doubles_dimensions() {
        let crop = split_crop();
        let gray = to_grayscale(&crop);
        let resized = PreprocessVariant::Resized2x.apply(&crop, &gray);
        assert_eq!((resized.width(), resized.height()), (40, 20));
    }

    #[test]
    fn test_inverted() {
        let crop = split_crop();
        let gray = to_grayscale(&crop);
        let inverted = PreprocessVariant::Inverted.apply(&crop, &gray).to_luma8();
        assert_eq!(inverted.get_pixel(0, 0)[0], 255 - gray.get_pixel(0, 0)[0]);
    }

    #[test]
    fn test_bilateral_preserves_edges_and_flat_regions() {
        let crop = split_crop();
        let gray = to_grayscale(&crop);
        let smoothed = bilateral_filter(&gray, 11, 17.0, 17.0);

        assert_eq!(smoothed.dimensions(), gray.dimensions());
        // Intensity gap far exceeds sigma_color, so the edge survives
        assert_eq!(smoothed.get_pixel(9, 5)[0], gray.get_pixel(9, 5)[0]);
        assert_eq!(smoothed.get_pixel(10, 5)[0], gray.get_pixel(10, 5)[0]);
    }

    #[test]
    fn test_sharpen_keeps_flat_regions() {
        let gray = GrayImage::from_pixel(8, 8, Luma([100]));
        let sharpened = sharpen(&gray);
        assert_eq!(sharpened.get_pixel(4, 4)[0], 100);
    }

    #[test]
    fn test_every_variant_produces_an_image() {
        let crop = split_crop();
        let gray = to_grayscale(&crop);
        for variant in PreprocessVariant::ALL {
            let image = variant.apply(&crop, &gray);
            assert!(image.width() > 0 && image.height() > 0, "{}", variant.name());
        }
    }
}
