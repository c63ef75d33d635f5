//! Media descriptor assembly.
//!
//! A [`MediaDescriptor`] is what the editor receives: where the file lives, its pixel
//! size when it is an image, and the metadata the user typed in. [`build`] is pure.

use crate::types::MediaType;
use crate::upload::StoredFile;
use serde::{Deserialize, Serialize};

/// User-entered metadata. In a patch, `None` leaves the current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediaMetadata {
    pub alt: Option<String>,
    pub title: Option<String>,
    pub link_text: Option<String>,
}

impl MediaMetadata {
    /// Overwrite the fields present in `patch`
    pub fn apply(&mut self, patch: MediaMetadata) {
        if patch.alt.is_some() {
            self.alt = patch.alt;
        }
        if patch.title.is_some() {
            self.title = patch.title;
        }
        if patch.link_text.is_some() {
            self.link_text = patch.link_text;
        }
    }
}

/// The finished media item handed back to the editor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub src: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_text: Option<String>,
    pub media_type: MediaType,
}

/// Assemble a descriptor from a stored file and the user's metadata.
///
/// Alt text is only carried for images and link text only for documents. Blank strings
/// are dropped.
pub fn build(stored: &StoredFile, metadata: &MediaMetadata, media_type: MediaType) -> MediaDescriptor {
    let alt = match media_type {
        MediaType::Image => non_blank(&metadata.alt),
        MediaType::Document => None,
    };
    let link_text = match media_type {
        MediaType::Document => non_blank(&metadata.link_text),
        MediaType::Image => None,
    };

    MediaDescriptor {
        src: stored.url.clone(),
        width: stored.width,
        height: stored.height,
        alt,
        title: non_blank(&metadata.title),
        link_text,
        media_type,
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}
