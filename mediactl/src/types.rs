//! Common type definitions shared across the pipeline.
//!
//! - [`SessionId`]: identifier of one media-modal session
//! - [`Visibility`]: public vs private storage mode
//! - [`MediaType`]: image vs document, inferred from the declared MIME type
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging
//! - [`is_image_mime`]: the single "is this an image" rule used everywhere

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type SessionId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// A MIME type is treated as an image when it contains the substring `image`.
///
/// Matches loosely: `image/svg+xml` and vendor types such as `application/x-image` both
/// count. The session type and the resolver's probing decision both go through here.
pub fn is_image_mime(mime: &str) -> bool {
    mime.contains("image")
}

/// Storage visibility of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// World-readable, addressed by a plain public URL
    #[default]
    Public,
    /// Access-controlled, addressed by a signed URL where the backend supports one
    Private,
}

impl Visibility {
    pub fn is_public(self) -> bool {
        matches!(self, Visibility::Public)
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Private => write!(f, "private"),
        }
    }
}

/// Kind of media being inserted into the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Image,
    Document,
}

impl MediaType {
    /// Infer the media type from a declared MIME type.
    pub fn from_mime(mime: &str) -> Self {
        if is_image_mime(mime) { MediaType::Image } else { MediaType::Document }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Image => write!(f, "image"),
            MediaType::Document => write!(f, "document"),
        }
    }
}
