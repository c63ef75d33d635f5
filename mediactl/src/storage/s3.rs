use super::{Disk, PutOptions, Result, StorageError, check_key, join_url};
use crate::config::S3DiskConfig;
use crate::types::Visibility;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use bytes::Bytes;
use std::time::Duration;
use url::Url;

/// S3-compatible object storage disk.
///
/// Public writes carry the `public-read` canned ACL and resolve to a plain object URL.
/// Private writes carry no ACL and resolve to a presigned GET URL valid for
/// `presign_expiry`.
pub struct S3Disk {
    client: Client,
    bucket: String,
    public_base: Url,
    presign_expiry: Duration,
}

impl S3Disk {
    pub fn new(client: Client, bucket: String, public_base: Url, presign_expiry: Duration) -> Self {
        Self {
            client,
            bucket,
            public_base,
            presign_expiry,
        }
    }

    /// Build the SDK client from the shared AWS configuration chain plus disk overrides
    pub async fn from_config(config: &S3DiskConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let (Some(access_key_id), Some(secret_access_key)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id.clone(),
                secret_access_key.clone(),
                None,
                None,
                "mediactl-config",
            ));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.as_str());
        }
        let client = Client::from_conf(builder.build());

        let region = sdk_config.region().map(|r| r.to_string()).unwrap_or_else(|| "us-east-1".to_string());
        let public_base = public_base_url(config, &region)?;

        Ok(Self::new(client, config.bucket.clone(), public_base, config.presign_expiry))
    }

    async fn put_object(&self, key: &str, content: Bytes, options: &PutOptions, if_absent: bool) -> Result<()> {
        check_key(key)?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(content))
            .set_content_type(options.content_type.clone());
        if options.visibility.is_public() {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }
        if if_absent {
            request = request.if_none_match("*");
        }

        match request.send().await {
            Ok(_) => {
                tracing::debug!(bucket = %self.bucket, key, visibility = %options.visibility, "Wrote object to S3");
                Ok(())
            }
            Err(e) if if_absent && e.raw_response().is_some_and(|r| r.status().as_u16() == 412) => {
                Err(StorageError::AlreadyExists { key: key.to_string() })
            }
            Err(e) => Err(StorageError::Other(anyhow::anyhow!(
                "S3 PutObject failed for '{}': {}",
                key,
                DisplayErrorContext(&e)
            ))),
        }
    }
}

/// Base URL for public objects: explicit `url` wins, then a path-style or virtual-host
/// URL on the custom endpoint, then the AWS virtual-host URL.
fn public_base_url(config: &S3DiskConfig, region: &str) -> Result<Url> {
    if let Some(url) = &config.url {
        return Ok(url.clone());
    }
    let raw = match &config.endpoint {
        Some(endpoint) if config.force_path_style => format!("{}/{}/", endpoint.as_str().trim_end_matches('/'), config.bucket),
        Some(endpoint) => {
            let mut url = endpoint.clone();
            let host = format!("{}.{}", config.bucket, endpoint.host_str().unwrap_or_default());
            url.set_host(Some(&host))
                .map_err(|e| StorageError::Other(anyhow::anyhow!("Invalid virtual-host endpoint for bucket {}: {}", config.bucket, e)))?;
            url.to_string()
        }
        None => format!("https://{}.s3.{}.amazonaws.com/", config.bucket, region),
    };
    raw.parse()
        .map_err(|e| StorageError::Other(anyhow::anyhow!("Invalid public URL '{}' for bucket {}: {}", raw, config.bucket, e)))
}

#[async_trait]
impl Disk for S3Disk {
    fn driver(&self) -> &'static str {
        "s3"
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        check_key(key)?;

        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(StorageError::Other(anyhow::anyhow!(
                "S3 HeadObject failed for '{}': {}",
                key,
                DisplayErrorContext(&e)
            ))),
        }
    }

    async fn put(&self, key: &str, content: Bytes, options: &PutOptions) -> Result<()> {
        self.put_object(key, content, options, false).await
    }

    async fn put_if_absent(&self, key: &str, content: Bytes, options: &PutOptions) -> Result<()> {
        self.put_object(key, content, options, true).await
    }

    async fn url(&self, key: &str, visibility: Visibility) -> Result<String> {
        check_key(key)?;

        match visibility {
            Visibility::Public => join_url(&self.public_base, key),
            Visibility::Private => {
                let presigning = PresigningConfig::expires_in(self.presign_expiry)
                    .map_err(|e| StorageError::Other(anyhow::anyhow!("Invalid presign expiry: {}", e)))?;
                let request = self
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .presigned(presigning)
                    .await
                    .map_err(|e| StorageError::Other(anyhow::anyhow!("Failed to presign '{}': {}", key, DisplayErrorContext(&e))))?;
                Ok(request.uri().to_string())
            }
        }
    }

    async fn read(&self, key: &str) -> Result<Bytes> {
        check_key(key)?;

        let output = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Err(StorageError::NotFound { key: key.to_string() });
            }
            Err(e) => {
                return Err(StorageError::Other(anyhow::anyhow!(
                    "S3 GetObject failed for '{}': {}",
                    key,
                    DisplayErrorContext(&e)
                )));
            }
        };

        let content = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Other(anyhow::anyhow!("Failed to read S3 object body for '{}': {}", key, e)))?;
        Ok(content.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_disk(server: &MockServer) -> S3Disk {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("test-key", "test-secret", None, None, "test"))
            .endpoint_url(server.uri())
            .force_path_style(true)
            .build();
        let public_base = format!("{}/media-bucket/", server.uri()).parse().unwrap();
        S3Disk::new(Client::from_conf(config), "media-bucket".to_string(), public_base, Duration::from_secs(600))
    }

    #[tokio::test]
    async fn test_s3_exists_maps_404_to_false() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/media-bucket/media/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/media-bucket/media/present.png"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", "3"))
            .mount(&server)
            .await;

        let disk = test_disk(&server);

        assert!(!disk.exists("media/missing.png").await.unwrap());
        assert!(disk.exists("media/present.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_s3_public_put_sets_acl() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/media-bucket/media/photo.png"))
            .and(header("x-amz-acl", "public-read"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let disk = test_disk(&server);
        let options = PutOptions {
            visibility: Visibility::Public,
            content_type: Some("image/png".to_string()),
        };

        disk.put("media/photo.png", Bytes::from_static(b"png"), &options).await.unwrap();
    }

    #[tokio::test]
    async fn test_s3_put_if_absent_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/media-bucket/media/photo.png"))
            .and(header("if-none-match", "*"))
            .respond_with(ResponseTemplate::new(412))
            .mount(&server)
            .await;

        let disk = test_disk(&server);
        let options = PutOptions {
            visibility: Visibility::Private,
            content_type: None,
        };

        let result = disk.put_if_absent("media/photo.png", Bytes::from_static(b"png"), &options).await;
        assert!(matches!(result, Err(StorageError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_s3_read() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media-bucket/media/notes.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let disk = test_disk(&server);

        assert_eq!(disk.read("media/notes.txt").await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_s3_urls() {
        let server = MockServer::start().await;
        let disk = test_disk(&server);

        let public = disk.url("media/photo.png", Visibility::Public).await.unwrap();
        assert_eq!(public, format!("{}/media-bucket/media/photo.png", server.uri()));

        let private = disk.url("media/photo.png", Visibility::Private).await.unwrap();
        assert!(private.contains("/media-bucket/media/photo.png?"));
        assert!(private.contains("X-Amz-Signature="));
        assert!(private.contains("X-Amz-Expires=600"));
    }

    #[test]
    fn test_public_base_url_variants() {
        let mut config = S3DiskConfig {
            bucket: "assets".to_string(),
            ..Default::default()
        };
        assert_eq!(public_base_url(&config, "eu-west-1").unwrap().as_str(), "https://assets.s3.eu-west-1.amazonaws.com/");

        config.endpoint = Some("http://minio:9000".parse().unwrap());
        config.force_path_style = true;
        assert_eq!(public_base_url(&config, "eu-west-1").unwrap().as_str(), "http://minio:9000/assets/");

        config.force_path_style = false;
        assert_eq!(public_base_url(&config, "eu-west-1").unwrap().as_str(), "http://assets.minio:9000/");

        config.url = Some("https://cdn.example.com/".parse().unwrap());
        assert_eq!(public_base_url(&config, "eu-west-1").unwrap().as_str(), "https://cdn.example.com/");
    }
}
