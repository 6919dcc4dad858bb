use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, ImageDecoder, ImageReader, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// Contrast boost applied once before orientation search.
pub const CONTRAST_FACTOR: f32 = 1.5;
/// Sharpness boost applied once before orientation search.
pub const SHARPNESS_FACTOR: f32 = 2.0;
/// Longest side kept before enhancement; larger photos are scaled down.
pub const MAX_DIMENSION: u32 = 2800;

/// 3×3 smoothing kernel the sharpness blend is measured against, row-major.
const SMOOTH_KERNEL: [u32; 9] = [1, 1, 1, 1, 5, 1, 1, 1, 1];
const SMOOTH_DIVISOR: u32 = 13;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to load image: {0}. Please try a different image format or ensure the image is not corrupted.")]
    Load(#[from] image::ImageError),
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
}

/// Decode an image file, honouring its EXIF orientation.
pub fn open(path: &Path) -> Result<DynamicImage, PreprocessError> {
    let data = std::fs::read(path)?;
    decode(&data)
}

/// Decode raw bytes (JPEG / PNG / WEBP / …), honouring the EXIF orientation tag.
pub fn decode(data: &[u8]) -> Result<DynamicImage, PreprocessError> {
    let mut decoder = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// RGB coercion, downscale guard, contrast and sharpness boost.
pub fn prepare(img: DynamicImage) -> DynamicImage {
    let img = if img.width() > MAX_DIMENSION || img.height() > MAX_DIMENSION {
        img.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Lanczos3)
    } else {
        img
    };

    let rgb = img.to_rgb8();
    let rgb = enhance_contrast(&rgb, CONTRAST_FACTOR);
    let rgb = enhance_sharpness(&rgb, SHARPNESS_FACTOR);
    DynamicImage::ImageRgb8(rgb)
}

/// Push every channel away from the image's mean gray level by `factor`.
pub fn enhance_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    let pixels = u64::from(img.width()) * u64::from(img.height());
    if pixels == 0 {
        return img.clone();
    }

    // ITU-R 601-2 luma, as used for grayscale conversion.
    let luma_sum: f64 = img
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            (f64::from(r) * 299.0 + f64::from(g) * 587.0 + f64::from(b) * 114.0) / 1000.0
        })
        .sum();
    let mean = (luma_sum / pixels as f64).round() as f32;

    let mut out = img.clone();
    for p in out.pixels_mut() {
        for c in p.0.iter_mut() {
            *c = blend(mean, f32::from(*c), factor);
        }
    }
    out
}

/// Push every pixel away from its smoothed neighbourhood by `factor`.
pub fn enhance_sharpness(img: &RgbImage, factor: f32) -> RgbImage {
    let smoothed = smooth(img);
    let mut out = img.clone();
    for (p, s) in out.pixels_mut().zip(smoothed.pixels()) {
        for (c, base) in p.0.iter_mut().zip(s.0) {
            *c = blend(f32::from(base), f32::from(*c), factor);
        }
    }
    out
}

/// Border pixels are copied through unfiltered.
fn smooth(img: &RgbImage) -> RgbImage {
    let (w, h) = img.dimensions();
    ImageBuffer::from_fn(w, h, |x, y| {
        if x == 0 || y == 0 || x + 1 >= w || y + 1 >= h {
            return *img.get_pixel(x, y);
        }
        let mut acc = [0u32; 3];
        for (i, weight) in SMOOTH_KERNEL.iter().enumerate() {
            let px = img.get_pixel(x + i as u32 % 3 - 1, y + i as u32 / 3 - 1);
            for (a, c) in acc.iter_mut().zip(px.0) {
                *a += weight * u32::from(c);
            }
        }
        Rgb(acc.map(|a| ((a + SMOOTH_DIVISOR / 2) / SMOOTH_DIVISOR) as u8))
    })
}

fn blend(base: f32, value: f32, factor: f32) -> u8 {
    (base + factor * (value - base)).round().clamp(0.0, 255.0) as u8
}

pub fn encode_as_png(img: &DynamicImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}
