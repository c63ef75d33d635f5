use super::{Disk, PutOptions, Result, StorageError, check_key, join_url};
use crate::types::Visibility;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;

/// Local filesystem disk - stores files below a root directory.
///
/// Visibility maps onto unix file modes: public files are world readable (`0644`),
/// private files are owner-only (`0600`). URLs are the key joined onto `base_url`, for
/// both visibilities.
pub struct LocalDisk {
    root: PathBuf,
    base_url: Url,
}

impl LocalDisk {
    pub fn new(root: PathBuf, base_url: Url) -> Self {
        Self { root, base_url }
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(self.root.join(key))
    }

    async fn write(&self, key: &str, content: &[u8], options: &PutOptions, create_new: bool) -> Result<()> {
        let full_path = self.full_path(key)?;

        // Ensure parent directory exists
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut open = fs::OpenOptions::new();
        open.write(true);
        if create_new {
            open.create_new(true);
        } else {
            open.create(true).truncate(true);
        }

        let mut file = match open.open(&full_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists { key: key.to_string() });
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(content).await?;
        file.sync_all().await?;

        set_visibility(&full_path, options.visibility).await?;

        tracing::debug!(key, bytes = content.len(), visibility = %options.visibility, "Wrote file to local disk");
        Ok(())
    }
}

#[cfg(unix)]
async fn set_visibility(path: &Path, visibility: Visibility) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = match visibility {
        Visibility::Public => 0o644,
        Visibility::Private => 0o600,
    };
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_visibility(_path: &Path, _visibility: Visibility) -> Result<()> {
    Ok(())
}

#[async_trait]
impl Disk for LocalDisk {
    fn driver(&self) -> &'static str {
        "local"
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full_path = self.full_path(key)?;
        Ok(fs::try_exists(&full_path).await?)
    }

    async fn put(&self, key: &str, content: Bytes, options: &PutOptions) -> Result<()> {
        self.write(key, &content, options, false).await
    }

    async fn put_if_absent(&self, key: &str, content: Bytes, options: &PutOptions) -> Result<()> {
        self.write(key, &content, options, true).await
    }

    async fn url(&self, key: &str, _visibility: Visibility) -> Result<String> {
        check_key(key)?;
        join_url(&self.base_url, key)
    }

    async fn read(&self, key: &str) -> Result<Bytes> {
        let full_path = self.full_path(key)?;

        match fs::read(&full_path).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound { key: key.to_string() }),
            Err(e) => Err(e.into()),
        }
    }

    fn local_path(&self, key: &str) -> Option<PathBuf> {
        self.full_path(key).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(root: &Path) -> LocalDisk {
        LocalDisk::new(root.to_path_buf(), "http://localhost:3000/storage".parse().unwrap())
    }

    fn public() -> PutOptions {
        PutOptions {
            visibility: Visibility::Public,
            content_type: Some("text/plain".to_string()),
        }
    }

    #[tokio::test]
    async fn test_local_disk_lifecycle() {
        let temp_dir = tempfile::tempdir().unwrap();
        let disk = disk(temp_dir.path());

        let content = Bytes::from_static(b"test content for local storage");

        assert!(!disk.exists("media/notes.txt").await.unwrap());

        disk.put("media/notes.txt", content.clone(), &public()).await.unwrap();

        assert!(disk.exists("media/notes.txt").await.unwrap());
        assert_eq!(disk.read("media/notes.txt").await.unwrap(), content);
        assert_eq!(
            disk.url("media/notes.txt", Visibility::Public).await.unwrap(),
            "http://localhost:3000/storage/media/notes.txt"
        );
        assert_eq!(disk.local_path("media/notes.txt").unwrap(), temp_dir.path().join("media/notes.txt"));
    }

    #[tokio::test]
    async fn test_local_disk_put_overwrites() {
        let temp_dir = tempfile::tempdir().unwrap();
        let disk = disk(temp_dir.path());

        disk.put("a.txt", Bytes::from_static(b"first version"), &public()).await.unwrap();
        disk.put("a.txt", Bytes::from_static(b"second"), &public()).await.unwrap();

        assert_eq!(disk.read("a.txt").await.unwrap(), Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn test_local_disk_put_if_absent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let disk = disk(temp_dir.path());

        disk.put_if_absent("a.txt", Bytes::from_static(b"original"), &public()).await.unwrap();
        let result = disk.put_if_absent("a.txt", Bytes::from_static(b"intruder"), &public()).await;

        assert!(matches!(result, Err(StorageError::AlreadyExists { ref key }) if key == "a.txt"));
        assert_eq!(disk.read("a.txt").await.unwrap(), Bytes::from_static(b"original"));
    }

    #[tokio::test]
    async fn test_local_disk_read_nonexistent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let disk = disk(temp_dir.path());

        let result = disk.read("nonexistent/file.dat").await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_local_disk_rejects_escaping_keys() {
        let temp_dir = tempfile::tempdir().unwrap();
        let disk = disk(temp_dir.path());

        let result = disk.put("../outside.txt", Bytes::from_static(b"x"), &public()).await;
        assert!(matches!(result, Err(StorageError::InvalidKey { .. })));
        assert!(disk.local_path("../outside.txt").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_disk_visibility_modes() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().unwrap();
        let disk = disk(temp_dir.path());

        disk.put("public.txt", Bytes::from_static(b"x"), &public()).await.unwrap();
        let private = PutOptions {
            visibility: Visibility::Private,
            content_type: None,
        };
        disk.put("private.txt", Bytes::from_static(b"x"), &private).await.unwrap();

        let mode = |name: &str| std::fs::metadata(temp_dir.path().join(name)).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode("public.txt"), 0o644);
        assert_eq!(mode("private.txt"), 0o600);
    }
}
