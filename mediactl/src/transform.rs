//! Server-side image cropping and resizing applied before an image is stored.

use crate::probe::{ImageDimensions, ImageReadError};
use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
#[error("Invalid aspect ratio '{0}', expected 'W:H', 'W/H' or a positive number")]
pub struct InvalidAspectRatio(pub String);

/// Width divided by height
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectRatio(f64);

impl AspectRatio {
    pub fn value(self) -> f64 {
        self.0
    }
}

impl FromStr for AspectRatio {
    type Err = InvalidAspectRatio;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidAspectRatio(s.to_string());
        let trimmed = s.trim();
        let ratio = match trimmed.split_once([':', '/']) {
            Some((w, h)) => {
                let w: f64 = w.trim().parse().map_err(|_| invalid())?;
                let h: f64 = h.trim().parse().map_err(|_| invalid())?;
                if h == 0.0 {
                    return Err(invalid());
                }
                w / h
            }
            None => trimmed.parse().map_err(|_| invalid())?,
        };
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(invalid());
        }
        Ok(Self(ratio))
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a transform: re-encoded bytes and their dimensions
#[derive(Debug, Clone)]
pub struct Transformed {
    pub content: Bytes,
    pub dimensions: ImageDimensions,
}

/// Crop and resize settings for uploaded images
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImageTransform {
    pub crop_aspect_ratio: Option<AspectRatio>,
    pub resize_target_width: Option<u32>,
    pub resize_target_height: Option<u32>,
}

impl ImageTransform {
    pub fn is_noop(&self) -> bool {
        self.crop_aspect_ratio.is_none() && self.resize_target_width.is_none() && self.resize_target_height.is_none()
    }

    /// Apply the transform to encoded image bytes.
    ///
    /// Returns `Ok(None)` when there is nothing to do or the format is not one we can
    /// re-encode; the caller then stores the original bytes.
    pub async fn apply(&self, content: Bytes) -> Result<Option<Transformed>, ImageReadError> {
        if self.is_noop() {
            return Ok(None);
        }
        let transform = *self;
        tokio::task::spawn_blocking(move || transform.apply_blocking(&content)).await?
    }

    fn apply_blocking(&self, content: &[u8]) -> Result<Option<Transformed>, ImageReadError> {
        let Ok(format) = image::guess_format(content) else {
            return Ok(None);
        };
        if !matches!(
            format,
            ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::Bmp | ImageFormat::Tiff | ImageFormat::WebP
        ) {
            return Ok(None);
        }

        let mut img = image::load_from_memory_with_format(content, format)?;

        if let Some(ratio) = self.crop_aspect_ratio {
            img = crop_to_ratio(img, ratio);
        }

        img = match (self.resize_target_width, self.resize_target_height) {
            (Some(width), Some(height)) => img.resize_to_fill(width, height, FilterType::Lanczos3),
            (Some(width), None) => {
                let height = scale(img.height(), width, img.width());
                img.resize_exact(width, height, FilterType::Lanczos3)
            }
            (None, Some(height)) => {
                let width = scale(img.width(), height, img.height());
                img.resize_exact(width, height, FilterType::Lanczos3)
            }
            (None, None) => img,
        };

        // JPEG has no alpha channel
        if format == ImageFormat::Jpeg {
            img = DynamicImage::ImageRgb8(img.to_rgb8());
        }

        let dimensions = ImageDimensions::new(img.width(), img.height())?;
        let mut out = Cursor::new(Vec::with_capacity(content.len()));
        img.write_to(&mut out, format)?;

        tracing::debug!(
            format = ?format,
            width = dimensions.width,
            height = dimensions.height,
            "Transformed uploaded image"
        );

        Ok(Some(Transformed {
            content: Bytes::from(out.into_inner()),
            dimensions,
        }))
    }
}

/// `value * numerator / denominator`, rounded, never below one pixel
fn scale(value: u32, numerator: u32, denominator: u32) -> u32 {
    let scaled = (value as f64 * numerator as f64 / denominator.max(1) as f64).round();
    (scaled as u32).max(1)
}

/// Center-crop to the given width/height ratio
fn crop_to_ratio(img: DynamicImage, ratio: AspectRatio) -> DynamicImage {
    let (width, height) = (img.width(), img.height());
    let current = width as f64 / height as f64;
    let target = ratio.value();

    if (current - target).abs() < f64::EPSILON {
        return img;
    }

    if current > target {
        let new_width = ((height as f64 * target).round() as u32).clamp(1, width);
        let x = (width - new_width) / 2;
        img.crop_imm(x, 0, new_width, height)
    } else {
        let new_height = ((width as f64 / target).round() as u32).clamp(1, height);
        let y = (height - new_height) / 2;
        img.crop_imm(0, y, width, new_height)
    }
}
