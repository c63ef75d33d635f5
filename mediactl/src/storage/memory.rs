use super::{Disk, PutOptions, Result, StorageError, check_key, join_url};
use crate::types::Visibility;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use url::Url;

#[derive(Debug, Clone)]
struct MemoryObject {
    content: Bytes,
    visibility: Visibility,
    content_type: Option<String>,
}

/// In-memory disk - contents live as long as the process.
///
/// Private files get a URL carrying a `visibility=private` query marker so tests can tell
/// the two write paths apart.
pub struct MemoryDisk {
    objects: DashMap<String, MemoryObject>,
    base_url: Url,
}

impl MemoryDisk {
    pub fn new(base_url: Url) -> Self {
        Self {
            objects: DashMap::new(),
            base_url,
        }
    }

    /// Visibility a key was written with
    pub fn visibility(&self, key: &str) -> Option<Visibility> {
        self.objects.get(key).map(|object| object.visibility)
    }

    /// Content type a key was written with
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.get(key).and_then(|object| object.content_type.clone())
    }

    /// Number of stored files
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn object(content: Bytes, options: &PutOptions) -> MemoryObject {
        MemoryObject {
            content,
            visibility: options.visibility,
            content_type: options.content_type.clone(),
        }
    }
}

#[async_trait]
impl Disk for MemoryDisk {
    fn driver(&self) -> &'static str {
        "memory"
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        check_key(key)?;
        Ok(self.objects.contains_key(key))
    }

    async fn put(&self, key: &str, content: Bytes, options: &PutOptions) -> Result<()> {
        check_key(key)?;
        self.objects.insert(key.to_string(), Self::object(content, options));
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, content: Bytes, options: &PutOptions) -> Result<()> {
        check_key(key)?;
        match self.objects.entry(key.to_string()) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists { key: key.to_string() }),
            Entry::Vacant(slot) => {
                slot.insert(Self::object(content, options));
                Ok(())
            }
        }
    }

    async fn url(&self, key: &str, visibility: Visibility) -> Result<String> {
        check_key(key)?;
        let url = join_url(&self.base_url, key)?;
        Ok(match visibility {
            Visibility::Public => url,
            Visibility::Private => format!("{url}?visibility=private"),
        })
    }

    async fn read(&self, key: &str) -> Result<Bytes> {
        check_key(key)?;
        self.objects
            .get(key)
            .map(|object| object.content.clone())
            .ok_or_else(|| StorageError::NotFound { key: key.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_disk_lifecycle() {
        let disk = MemoryDisk::new("http://cdn.test/".parse().unwrap());
        let options = PutOptions {
            visibility: Visibility::Private,
            content_type: Some("application/pdf".to_string()),
        };

        assert!(disk.is_empty());
        disk.put("docs/a.pdf", Bytes::from_static(b"%PDF"), &options).await.unwrap();

        assert!(disk.exists("docs/a.pdf").await.unwrap());
        assert_eq!(disk.read("docs/a.pdf").await.unwrap(), Bytes::from_static(b"%PDF"));
        assert_eq!(disk.visibility("docs/a.pdf"), Some(Visibility::Private));
        assert_eq!(disk.content_type("docs/a.pdf").as_deref(), Some("application/pdf"));
        assert_eq!(
            disk.url("docs/a.pdf", Visibility::Private).await.unwrap(),
            "http://cdn.test/docs/a.pdf?visibility=private"
        );
        assert!(matches!(disk.read("docs/b.pdf").await, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_memory_disk_put_if_absent() {
        let disk = MemoryDisk::new("http://cdn.test/".parse().unwrap());
        let options = PutOptions {
            visibility: Visibility::Public,
            content_type: None,
        };

        disk.put_if_absent("a.txt", Bytes::from_static(b"one"), &options).await.unwrap();
        let second = disk.put_if_absent("a.txt", Bytes::from_static(b"two"), &options).await;

        assert!(matches!(second, Err(StorageError::AlreadyExists { .. })));
        assert_eq!(disk.read("a.txt").await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(disk.len(), 1);
    }
}
