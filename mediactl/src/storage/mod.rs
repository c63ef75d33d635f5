//! Key-addressed blob storage ("disks").
//!
//! Every disk implements [`Disk`]. Keys are `/`-separated relative paths such as
//! `media/3f1c....png`; how a key maps onto the backend is up to the implementation:
//!
//! - [`LocalDisk`]: files under a root directory, served from a configured base URL
//! - [`S3Disk`]: objects in an S3-compatible bucket
//! - [`MemoryDisk`]: a process-local map, used in tests and for throwaway setups
//!
//! Disks are created from configuration by [`create_disk`] and looked up by name
//! through [`Disks`].

mod local;
mod memory;
mod s3;

pub use local::LocalDisk;
pub use memory::MemoryDisk;
pub use s3::S3Disk;

use crate::config::DiskConfig;
use crate::types::Visibility;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Errors surfaced by storage backends
#[derive(Error, Debug)]
pub enum StorageError {
    /// Nothing is stored under the key
    #[error("No file stored at '{key}'")]
    NotFound { key: String },

    /// A create-if-absent write found the key already taken
    #[error("A file already exists at '{key}'")]
    AlreadyExists { key: String },

    /// The key would escape the disk (absolute, or containing `..`)
    #[error("Invalid storage key '{key}'")]
    InvalidKey { key: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for backend failures (network, SDK, signing)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Type alias for storage operation results
pub type Result<T> = std::result::Result<T, StorageError>;

/// Options for a single write
#[derive(Debug, Clone)]
pub struct PutOptions {
    pub visibility: Visibility,
    pub content_type: Option<String>,
}

/// A named, key-addressed blob store.
#[async_trait]
pub trait Disk: Send + Sync {
    /// Driver name used in logs (`local`, `s3`, `memory`)
    fn driver(&self) -> &'static str;

    /// Check whether a file is stored under `key`
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Store `content` under `key`, replacing whatever was there
    async fn put(&self, key: &str, content: Bytes, options: &PutOptions) -> Result<()>;

    /// Store `content` under `key` only if nothing is stored there yet.
    ///
    /// Fails with [`StorageError::AlreadyExists`] when the key is taken. The check and the
    /// write are a single backend operation.
    async fn put_if_absent(&self, key: &str, content: Bytes, options: &PutOptions) -> Result<()>;

    /// URL under which the file can be fetched by the editor.
    ///
    /// Public files get a plain URL; private files get a signed URL on backends that
    /// support signing.
    async fn url(&self, key: &str, visibility: Visibility) -> Result<String>;

    /// Read the full content stored under `key`
    async fn read(&self, key: &str) -> Result<Bytes>;

    /// Filesystem path of the file when the backend is a local directory
    fn local_path(&self, _key: &str) -> Option<PathBuf> {
        None
    }
}

fn has_unsafe_segment(path: &str) -> bool {
    path.contains('\\') || path.split('/').any(|segment| segment == "..")
}

/// Reject keys that could address something outside the disk.
pub(crate) fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') || has_unsafe_segment(key) {
        return Err(StorageError::InvalidKey { key: key.to_string() });
    }
    Ok(())
}

/// Reject directories that would place keys outside the disk. Empty means the disk root.
pub fn check_directory(directory: &str) -> Result<()> {
    if has_unsafe_segment(directory) {
        return Err(StorageError::InvalidKey {
            key: directory.to_string(),
        });
    }
    Ok(())
}

/// Append a key to a base URL, one percent-encoded path segment per key segment.
///
/// The base is treated as a directory even without a trailing slash.
pub(crate) fn join_url(base: &Url, key: &str) -> Result<String> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| StorageError::Other(anyhow::anyhow!("Base URL '{}' cannot carry a path", base)))?
        .pop_if_empty()
        .extend(key.split('/'));
    Ok(url.into())
}

/// Registry of configured disks, keyed by disk name
#[derive(Clone, Default)]
pub struct Disks {
    disks: BTreeMap<String, Arc<dyn Disk>>,
}

impl Disks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create every disk named in the configuration
    pub async fn from_config(config: &BTreeMap<String, DiskConfig>) -> Result<Self> {
        let mut disks = Self::new();
        for (name, disk_config) in config {
            let disk = create_disk(name, disk_config).await?;
            tracing::debug!(disk = %name, driver = disk.driver(), "Disk ready");
            disks.insert(name.clone(), disk);
        }
        Ok(disks)
    }

    pub fn insert(&mut self, name: impl Into<String>, disk: Arc<dyn Disk>) {
        self.disks.insert(name.into(), disk);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Disk>> {
        self.disks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.disks.contains_key(name)
    }
}

/// Create a disk backend based on configuration
pub async fn create_disk(name: &str, config: &DiskConfig) -> Result<Arc<dyn Disk>> {
    match config {
        DiskConfig::Local { root, url, .. } => {
            tracing::info!(disk = name, "Creating local disk (root: {:?})", root);
            if let Err(e) = tokio::fs::create_dir_all(root).await {
                return Err(StorageError::Other(anyhow::anyhow!(
                    "Failed to create local storage directory {:?}: {}",
                    root,
                    e
                )));
            }
            Ok(Arc::new(LocalDisk::new(root.clone(), url.clone())))
        }
        DiskConfig::S3(s3_config) => {
            tracing::info!(disk = name, bucket = %s3_config.bucket, "Creating S3 disk");
            Ok(Arc::new(S3Disk::from_config(s3_config).await?))
        }
        DiskConfig::Memory { url } => {
            tracing::info!(disk = name, "Creating in-memory disk");
            Ok(Arc::new(MemoryDisk::new(url.clone())))
        }
    }
}
