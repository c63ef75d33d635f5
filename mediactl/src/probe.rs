//! Image dimension probing.
//!
//! Dimensions are read from the image header only; pixel data is never decoded here.
//! Probing runs on the blocking pool since decoders do synchronous I/O.

use bytes::Bytes;
use image::ImageReader;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure to read an image that claims to be one
#[derive(Error, Debug)]
pub enum ImageReadError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image has no pixels ({width}x{height})")]
    Empty { width: u32, height: u32 },

    #[error("Image processing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Pixel dimensions of an image, both strictly positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Result<Self, ImageReadError> {
        if width == 0 || height == 0 {
            return Err(ImageReadError::Empty { width, height });
        }
        Ok(Self { width, height })
    }
}

/// Read dimensions from in-memory image bytes (format sniffed from the content)
pub async fn probe_bytes(content: Bytes) -> Result<ImageDimensions, ImageReadError> {
    tokio::task::spawn_blocking(move || dimensions_from_bytes(&content)).await?
}

/// Read dimensions from an image file on the local filesystem.
///
/// The format is sniffed from the content, so temporary files without an extension work.
pub async fn probe_path(path: &Path) -> Result<ImageDimensions, ImageReadError> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || dimensions_from_path(&path)).await?
}

pub(crate) fn dimensions_from_bytes(content: &[u8]) -> Result<ImageDimensions, ImageReadError> {
    let (width, height) = ImageReader::new(Cursor::new(content)).with_guessed_format()?.into_dimensions()?;
    ImageDimensions::new(width, height)
}

fn dimensions_from_path(path: &Path) -> Result<ImageDimensions, ImageReadError> {
    let (width, height) = ImageReader::open(path)?.with_guessed_format()?.into_dimensions()?;
    ImageDimensions::new(width, height)
}
