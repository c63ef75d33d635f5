//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `MEDIACTL_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `MEDIACTL_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `MEDIACTL_UPLOADS__VISIBILITY=private` sets the `uploads.visibility` field.
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`, `cors`
//! - **Disks**: `disks.<name>` - named storage backends (`local`, `s3`, `memory`)
//! - **Uploads**: `uploads.*` - visibility, naming, image transform and probe settings
//! - **Modal**: `modal.*` - defaults for new sessions (disk, directory, accepted types, size limit)
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! MEDIACTL_PORT=8080
//!
//! # Keep client file names
//! MEDIACTL_UPLOADS__PRESERVE_FILE_NAMES=true
//!
//! # Store into another configured disk by default
//! MEDIACTL_MODAL__DISK=s3
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf, time::Duration};
use url::Url;

use crate::errors::Error;
use crate::transform::AspectRatio;
use crate::types::Visibility;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "MEDIACTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Export traces over OTLP (configured through the standard `OTEL_*` variables)
    pub enable_otel_export: bool,
    pub cors: CorsConfig,
    /// Named storage disks
    pub disks: BTreeMap<String, DiskConfig>,
    pub uploads: UploadsConfig,
    pub modal: ModalConfig,
}

/// An allowed CORS origin.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests. Cannot be combined with a wildcard origin.
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: false,
            max_age: Some(3600),
        }
    }
}

/// A named storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum DiskConfig {
    /// Directory on the local filesystem
    Local {
        root: PathBuf,
        /// Public base URL files are reachable under
        url: Url,
        /// Mount path (e.g. `/storage`) to serve the directory from this server
        #[serde(default)]
        serve_at: Option<String>,
    },
    /// S3-compatible bucket
    S3(S3DiskConfig),
    /// Process-local store, for development and tests
    Memory { url: Url },
}

/// S3 bucket settings. Credentials and region fall back to the standard AWS chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct S3DiskConfig {
    pub bucket: String,
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores (MinIO, R2, ...)
    pub endpoint: Option<Url>,
    /// Public base URL override, e.g. a CDN in front of the bucket
    pub url: Option<Url>,
    pub force_path_style: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Lifetime of presigned URLs handed out for private files (default: 1h)
    #[serde(with = "humantime_serde")]
    pub presign_expiry: Duration,
}

impl Default for S3DiskConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: None,
            endpoint: None,
            url: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
            presign_expiry: Duration::from_secs(3600),
        }
    }
}

/// How uploads are named, stored and processed.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    /// Visibility of newly stored files (default: public)
    pub visibility: Visibility,
    /// Keep the client's file name instead of generating a UUID (default: false)
    pub preserve_file_names: bool,
    /// Center-crop images to this ratio before storing (`"16:9"`, `"1:1"`, `"1.5"`)
    pub image_crop_aspect_ratio: Option<String>,
    pub image_resize_target_width: Option<u32>,
    pub image_resize_target_height: Option<u32>,
    /// Reject images that cannot be decoded instead of storing them without dimensions
    pub strict_image_probe: bool,
    /// Write with create-if-absent so a key collision fails instead of overwriting
    pub write_if_absent: bool,
    /// Hard cap on request bodies for file uploads, in kilobytes (default: 10240)
    pub max_request_size_kb: u64,
    /// Uploads larger than this are spooled to a temporary file instead of held in memory (default: 1024)
    pub memory_threshold_kb: u64,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            visibility: Visibility::Public,
            preserve_file_names: false,
            image_crop_aspect_ratio: None,
            image_resize_target_width: None,
            image_resize_target_height: None,
            strict_image_probe: false,
            write_if_absent: false,
            max_request_size_kb: 10 * 1024,
            memory_threshold_kb: 1024,
        }
    }
}

/// Defaults for new modal sessions; each session may override them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModalConfig {
    /// Identifier sent with `close-modal` and `insert-media`
    pub id: String,
    pub disk: String,
    pub directory: String,
    pub accepted_file_types: Vec<String>,
    pub max_file_size_kb: u64,
    /// Sessions untouched for this long are discarded (default: 1h)
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,
}

impl Default for ModalConfig {
    fn default() -> Self {
        Self {
            id: "media-uploader-modal".to_string(),
            disk: "public".to_string(),
            directory: "media".to_string(),
            accepted_file_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
                "image/svg+xml".to_string(),
                "application/pdf".to_string(),
            ],
            max_file_size_kb: 2042,
            session_ttl: Duration::from_secs(3600),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut disks = BTreeMap::new();
        disks.insert(
            "public".to_string(),
            DiskConfig::Local {
                root: PathBuf::from("storage/public"),
                url: Url::parse("http://localhost:3000/storage/").expect("static URL is valid"),
                serve_at: Some("/storage".to_string()),
            },
        );

        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            enable_otel_export: false,
            cors: CorsConfig::default(),
            disks,
            uploads: UploadsConfig::default(),
            modal: ModalConfig::default(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.disks.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: at least one disk must be configured under `disks`".to_string(),
            });
        }

        if !self.disks.contains_key(&self.modal.disk) {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: modal.disk '{}' is not a configured disk (available: {})",
                    self.modal.disk,
                    self.disks.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            });
        }

        for (name, disk) in &self.disks {
            match disk {
                DiskConfig::S3(s3) if s3.bucket.trim().is_empty() => {
                    return Err(Error::Internal {
                        operation: format!("Config validation: disk '{name}' has an empty bucket"),
                    });
                }
                DiskConfig::Local { serve_at: Some(path), .. } if !path.starts_with('/') || path == "/" => {
                    return Err(Error::Internal {
                        operation: format!("Config validation: disk '{name}' serve_at must be a sub-path starting with '/', got '{path}'"),
                    });
                }
                _ => {}
            }
        }

        if self.modal.max_file_size_kb == 0 {
            return Err(Error::Internal {
                operation: "Config validation: modal.max_file_size_kb cannot be 0".to_string(),
            });
        }

        if self.modal.session_ttl.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: modal.session_ttl must be positive".to_string(),
            });
        }

        if self.modal.max_file_size_kb > self.uploads.max_request_size_kb {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: modal.max_file_size_kb ({}) cannot be greater than uploads.max_request_size_kb ({})",
                    self.modal.max_file_size_kb, self.uploads.max_request_size_kb
                ),
            });
        }

        if let Some(ratio) = &self.uploads.image_crop_aspect_ratio {
            ratio.parse::<AspectRatio>().map_err(|e| Error::Internal {
                operation: format!("Config validation: uploads.image_crop_aspect_ratio: {e}"),
            })?;
        }

        if self.uploads.image_resize_target_width == Some(0) || self.uploads.image_resize_target_height == Some(0) {
            return Err(Error::Internal {
                operation: "Config validation: image resize targets must be positive".to_string(),
            });
        }

        let has_wildcard = self.cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard));
        if has_wildcard && self.cors.allow_credentials {
            return Err(Error::Internal {
                operation: "Config validation: cors.allow_credentials cannot be used with a '*' origin".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values.
            // MEDIACTL_CONFIG names the file itself and is not a field.
            .merge(Env::prefixed("MEDIACTL_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
