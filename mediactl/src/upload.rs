//! The upload-and-resolve pipeline.
//!
//! [`UploadResolver::resolve`] takes an uploaded file and a target (disk, directory),
//! decides the final storage key, measures images, writes the bytes and returns a
//! [`StoredFile`] carrying the URL the editor should embed.
//!
//! # Naming
//!
//! The base name is the client's file stem when original names are preserved, otherwise a
//! fresh UUID. The candidate key is `directory/base.ext`. If something already exists
//! there, `-<unix timestamp>` is appended to the base name, once. There is no re-check
//! after the suffix is added: two uploads of the same name into the same directory within
//! the same second can still land on the same key. Enabling `write_if_absent` turns the
//! final write into an atomic create, so that race surfaces as
//! [`StorageError::AlreadyExists`] instead of an overwrite.
//!
//! # Images
//!
//! Files whose MIME type contains `image` are measured before the write (after the
//! optional [`ImageTransform`]). Bytes held in memory are decoded from memory; uploads
//! spooled to a temporary file are decoded from their path. When decoding fails the upload
//! still goes through without dimensions, unless `strict_image_probe` is set.

use crate::config::UploadsConfig;
use crate::errors::{Error, Result};
use crate::probe::{self, ImageDimensions, ImageReadError};
use crate::storage::{Disk, Disks, PutOptions, StorageError};
use crate::transform::{AspectRatio, ImageTransform, InvalidAspectRatio};
use crate::types::{Visibility, is_image_mime};
use bon::Builder;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempPath;
use uuid::Uuid;

/// Where the uploaded bytes currently live
#[derive(Debug, Clone)]
pub enum UploadSource {
    Memory(Bytes),
    /// A spooled temporary file, removed once the last handle is dropped
    TempFile(Arc<TempPath>),
}

/// A file received from the client, not yet stored
#[derive(Debug, Clone)]
pub struct UploadedFile {
    original_name: String,
    mime_type: String,
    size: u64,
    source: UploadSource,
}

impl UploadedFile {
    /// Wrap in-memory content. Without a declared MIME type one is guessed from the name.
    pub fn from_bytes(original_name: impl Into<String>, mime_type: Option<String>, content: Bytes) -> Self {
        let original_name = original_name.into();
        let mime_type = resolve_mime(&original_name, mime_type);
        Self {
            original_name,
            mime_type,
            size: content.len() as u64,
            source: UploadSource::Memory(content),
        }
    }

    /// Wrap a file already spooled to disk. The file is deleted when this upload is dropped.
    pub async fn from_temp_path(original_name: impl Into<String>, mime_type: Option<String>, path: TempPath) -> std::io::Result<Self> {
        let original_name = original_name.into();
        let mime_type = resolve_mime(&original_name, mime_type);
        let size = tokio::fs::metadata(&path).await?.len();
        Ok(Self {
            original_name,
            mime_type,
            size,
            source: UploadSource::TempFile(Arc::new(path)),
        })
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn source(&self) -> &UploadSource {
        &self.source
    }

    pub fn is_image(&self) -> bool {
        is_image_mime(&self.mime_type)
    }

    /// The client name with any directory part removed
    fn client_file_name(&self) -> &Path {
        let name = self.original_name.rsplit(['/', '\\']).next().unwrap_or_default();
        Path::new(name)
    }

    /// File stem of the client name, if it has a usable one
    pub fn stem(&self) -> Option<String> {
        self.client_file_name()
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Extension of the client name, falling back to one known for the MIME type
    pub fn extension(&self) -> Option<String> {
        let from_name = self
            .client_file_name()
            .extension()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        from_name.or_else(|| extension_for_mime(&self.mime_type))
    }

    async fn content(&self) -> std::io::Result<Bytes> {
        match &self.source {
            UploadSource::Memory(content) => Ok(content.clone()),
            UploadSource::TempFile(path) => Ok(Bytes::from(tokio::fs::read(&**path).await?)),
        }
    }
}

fn resolve_mime(original_name: &str, declared: Option<String>) -> String {
    declared
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| mime_guess::from_path(original_name).first_or_octet_stream().to_string())
}

/// Preferred extension for a MIME type: its own subtype when that is a known extension,
/// otherwise the first one `mime_guess` lists.
fn extension_for_mime(mime: &str) -> Option<String> {
    let extensions = mime_guess::get_mime_extensions_str(mime)?;
    let subtype = mime.split_once('/').map(|(_, sub)| sub).unwrap_or_default();
    extensions
        .iter()
        .find(|ext| **ext == subtype)
        .or_else(|| extensions.first())
        .map(|ext| ext.to_string())
}

/// One upload attempt
#[derive(Debug, Clone, Builder)]
pub struct UploadRequest {
    pub file: UploadedFile,
    #[builder(into)]
    pub disk: String,
    #[builder(into, default)]
    pub directory: String,
    #[builder(default)]
    pub preserve_original_name: bool,
    #[builder(default)]
    pub visibility: Visibility,
}

/// A file persisted on a disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub disk: String,
    pub key: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Resolver settings, fixed at construction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverConfig {
    /// Default visibility for new uploads
    pub visibility: Visibility,
    /// Default for keeping the client's file name instead of a UUID
    pub preserve_file_names: bool,
    pub transform: ImageTransform,
    /// Fail uploads whose image cannot be decoded instead of storing them without dimensions
    pub strict_image_probe: bool,
    /// Make the final write an atomic create-if-absent
    pub write_if_absent: bool,
}

impl TryFrom<&UploadsConfig> for ResolverConfig {
    type Error = InvalidAspectRatio;

    fn try_from(config: &UploadsConfig) -> std::result::Result<Self, Self::Error> {
        let crop_aspect_ratio = config
            .image_crop_aspect_ratio
            .as_deref()
            .map(str::parse::<AspectRatio>)
            .transpose()?;

        Ok(Self {
            visibility: config.visibility,
            preserve_file_names: config.preserve_file_names,
            transform: ImageTransform {
                crop_aspect_ratio,
                resize_target_width: config.image_resize_target_width,
                resize_target_height: config.image_resize_target_height,
            },
            strict_image_probe: config.strict_image_probe,
            write_if_absent: config.write_if_absent,
        })
    }
}

/// Base name for a stored file: the client stem, or a UUID
pub fn base_name(file: &UploadedFile, preserve_original_name: bool) -> String {
    if preserve_original_name && let Some(stem) = file.stem() {
        return stem;
    }
    Uuid::new_v4().to_string()
}

/// Build `directory/base.ext`, normalising separators in the directory
pub fn object_key(directory: &str, base: &str, extension: Option<&str>) -> String {
    let file_name = match extension {
        Some(ext) if !ext.is_empty() => format!("{base}.{ext}"),
        _ => base.to_string(),
    };
    let directory = directory.split('/').filter(|segment| !segment.is_empty()).collect::<Vec<_>>().join("/");
    if directory.is_empty() { file_name } else { format!("{directory}/{file_name}") }
}

/// Stores uploads on configured disks
#[derive(Clone)]
pub struct UploadResolver {
    disks: Disks,
    config: Arc<ResolverConfig>,
}

impl UploadResolver {
    pub fn new(disks: Disks, config: ResolverConfig) -> Self {
        Self {
            disks,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn disks(&self) -> &Disks {
        &self.disks
    }

    fn disk(&self, name: &str) -> Result<Arc<dyn Disk>> {
        self.disks.get(name).ok_or_else(|| Error::NotFound {
            resource: "Disk".to_string(),
            id: name.to_string(),
        })
    }

    /// Store an upload and return its final key, URL and dimensions
    #[tracing::instrument(skip_all, fields(disk = %request.disk, directory = %request.directory, file = %request.file.original_name()))]
    pub async fn resolve(&self, request: UploadRequest) -> Result<StoredFile> {
        let disk = self.disk(&request.disk)?;
        let file = &request.file;

        let base = base_name(file, request.preserve_original_name);
        let extension = file.extension();
        let candidate = object_key(&request.directory, &base, extension.as_deref());

        let key = if disk.exists(&candidate).await? {
            let suffixed = format!("{}-{}", base, chrono::Utc::now().timestamp());
            let key = object_key(&request.directory, &suffixed, extension.as_deref());
            tracing::debug!(candidate = %candidate, key = %key, "Candidate key taken, using timestamp suffix");
            key
        } else {
            candidate
        };

        let mut content = None;
        let mut dimensions = None;
        if file.is_image() {
            match self.prepare_image(file).await {
                Ok((prepared, dims)) => {
                    content = prepared;
                    dimensions = Some(dims);
                }
                Err(e) if self.config.strict_image_probe => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(mime = %file.mime_type(), error = %e, "Could not read image, storing without dimensions");
                }
            }
        }

        let content = match content {
            Some(content) => content,
            None => file.content().await.map_err(StorageError::from)?,
        };
        let options = PutOptions {
            visibility: request.visibility,
            content_type: Some(file.mime_type().to_string()),
        };
        let size = content.len();
        if self.config.write_if_absent {
            disk.put_if_absent(&key, content, &options).await?;
        } else {
            disk.put(&key, content, &options).await?;
        }

        let url = disk.url(&key, request.visibility).await?;

        tracing::info!(
            key = %key,
            bytes = size,
            visibility = %request.visibility,
            width = dimensions.map(|d| d.width),
            height = dimensions.map(|d| d.height),
            "Stored upload"
        );

        Ok(StoredFile {
            disk: request.disk.clone(),
            key,
            url,
            width: dimensions.map(|d| d.width),
            height: dimensions.map(|d| d.height),
        })
    }

    /// Transform (when configured) and measure an image.
    ///
    /// Returns the bytes to store when they differ from, or had to be loaded from, the
    /// original source.
    async fn prepare_image(&self, file: &UploadedFile) -> std::result::Result<(Option<Bytes>, ImageDimensions), ImageReadError> {
        if !self.config.transform.is_noop() {
            let original = file.content().await?;
            return match self.config.transform.apply(original.clone()).await? {
                Some(transformed) => Ok((Some(transformed.content), transformed.dimensions)),
                None => {
                    let dims = probe::probe_bytes(original.clone()).await?;
                    Ok((Some(original), dims))
                }
            };
        }

        let dims = match file.source() {
            UploadSource::Memory(content) => probe::probe_bytes(content.clone()).await?,
            UploadSource::TempFile(path) => probe::probe_path(path).await?,
        };
        Ok((None, dims))
    }

    /// Select a file that is already stored on a disk.
    ///
    /// Image dimensions are read from a local path when the disk exposes one, otherwise
    /// from the backend.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_existing(&self, disk_name: &str, key: &str) -> Result<StoredFile> {
        let disk = self.disk(disk_name)?;

        if !disk.exists(key).await? {
            return Err(StorageError::NotFound { key: key.to_string() }.into());
        }

        let mime = mime_guess::from_path(key).first_or_octet_stream();
        let mut dimensions = None;
        if is_image_mime(mime.essence_str()) {
            let probed = match disk.local_path(key) {
                Some(path) => probe::probe_path(&path).await,
                None => probe::probe_bytes(disk.read(key).await?).await,
            };
            match probed {
                Ok(dims) => dimensions = Some(dims),
                Err(e) if self.config.strict_image_probe => return Err(e.into()),
                Err(e) => tracing::warn!(error = %e, "Could not read stored image, selecting without dimensions"),
            }
        }

        let url = disk.url(key, self.config.visibility).await?;

        Ok(StoredFile {
            disk: disk_name.to_string(),
            key: key.to_string(),
            url,
            width: dimensions.map(|d| d.width),
            height: dimensions.map(|d| d.height),
        })
    }
}
