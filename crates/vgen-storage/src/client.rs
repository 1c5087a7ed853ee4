//! S3-compatible storage client.

use std::path::Path;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

/// Configuration for the storage client.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// S3 API endpoint; `None` uses the AWS default for the region
    pub endpoint_url: Option<String>,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket: String,
    /// Region ("auto" for most S3-compatible providers)
    pub region: String,
    /// Prefix under which videos are stored
    pub key_prefix: String,
    /// Lifetime of signed video URLs
    pub signed_url_ttl: Duration,
    /// Cache-Control header set on uploaded objects
    pub cache_control: String,
}

impl StorageConfig {
    /// Config with the given credentials and defaults for everything else.
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            endpoint_url: None,
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            bucket: "default".to_string(),
            region: "auto".to_string(),
            key_prefix: "Avatars".to_string(),
            signed_url_ttl: Duration::from_secs(24 * 60 * 60),
            cache_control: "max-age=3600".to_string(),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let access_key_id = std::env::var("STORAGE_ACCESS_KEY_ID")
            .map_err(|_| StorageError::config_error("STORAGE_ACCESS_KEY_ID not set"))?;
        let secret_access_key = std::env::var("STORAGE_SECRET_ACCESS_KEY")
            .map_err(|_| StorageError::config_error("STORAGE_SECRET_ACCESS_KEY not set"))?;
        let base = Self::new(access_key_id, secret_access_key);

        Ok(Self {
            endpoint_url: std::env::var("STORAGE_ENDPOINT_URL").ok().filter(|s| !s.is_empty()),
            bucket: std::env::var("BUCKET_ID").unwrap_or(base.bucket.clone()),
            region: std::env::var("STORAGE_REGION").unwrap_or(base.region.clone()),
            key_prefix: std::env::var("STORAGE_KEY_PREFIX").unwrap_or(base.key_prefix.clone()),
            signed_url_ttl: std::env::var("SIGNED_URL_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(base.signed_url_ttl),
            cache_control: std::env::var("STORAGE_CACHE_CONTROL")
                .unwrap_or(base.cache_control.clone()),
            ..base
        })
    }
}

/// Object storage client.
#[derive(Clone)]
pub struct StorageClient {
    client: Client,
    config: StorageConfig,
}

impl StorageClient {
    /// Create a new client from configuration.
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        if config.bucket.is_empty() {
            return Err(StorageError::config_error("bucket name is empty"));
        }

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "vgen-storage",
        );

        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);

        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            config,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Self::new(StorageConfig::from_env()?)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    /// Upload a file, replacing any existing object under `key`.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()> {
        let path = path.as_ref();
        let size = tokio::fs::metadata(path).await?.len();
        debug!("Uploading {} ({} bytes) to {}", path.display(), size, key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .cache_control(&self.config.cache_control)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!("Uploaded {} to {}/{}", path.display(), self.config.bucket, key);
        Ok(())
    }

    /// Generate a presigned GET URL.
    ///
    /// With `download_name` the URL makes the browser save the object under
    /// that name instead of playing it inline.
    pub async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
        download_name: Option<&str>,
    ) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let mut request = self.client.get_object().bucket(&self.config.bucket).key(key);
        if let Some(name) = download_name {
            request = request.response_content_disposition(format!("attachment; filename=\"{}\"", name));
        }

        let presigned = request
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    /// Check whether an object exists.
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(StorageError::AwsSdk(DisplayErrorContext(&e).to_string())),
        }
    }

    /// Delete an object.
    pub async fn delete_object(&self, key: &str) -> StorageResult<()> {
        debug!("Deleting {}", key);

        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        Ok(())
    }

    /// Check connectivity by performing a head bucket operation.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("storage connectivity check failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn client_for(endpoint: &str) -> StorageClient {
        let config = StorageConfig {
            endpoint_url: Some(endpoint.to_string()),
            bucket: "videos".to_string(),
            ..StorageConfig::new("test-access-key", "test-secret-key")
        };
        StorageClient::new(config).unwrap()
    }

    pub(crate) fn local_client() -> StorageClient {
        client_for("http://localhost:9000")
    }

    #[test]
    fn test_config_defaults() {
        let config = StorageConfig::new("id", "secret");
        assert_eq!(config.bucket, "default");
        assert_eq!(config.region, "auto");
        assert_eq!(config.key_prefix, "Avatars");
        assert_eq!(config.signed_url_ttl, Duration::from_secs(86400));
        assert_eq!(config.cache_control, "max-age=3600");
        assert!(config.endpoint_url.is_none());
    }

    #[test]
    fn test_empty_bucket_rejected() {
        let config = StorageConfig {
            bucket: String::new(),
            ..StorageConfig::new("id", "secret")
        };
        assert!(matches!(StorageClient::new(config), Err(StorageError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_presign_get_is_offline_and_time_limited() {
        let client = local_client();
        let url = client
            .presign_get("Avatars/output_abc.mp4", Duration::from_secs(3600), None)
            .await
            .unwrap();

        assert!(url.starts_with("http://localhost:9000/videos/Avatars/output_abc.mp4?"));
        assert!(url.contains("X-Amz-Expires=3600"));
        assert!(url.contains("X-Amz-Signature="));
        assert!(!url.contains("response-content-disposition"));
    }

    #[tokio::test]
    async fn test_presign_get_with_download_name() {
        let client = local_client();
        let url = client
            .presign_get("Avatars/output_abc.mp4", Duration::from_secs(60), Some("output_abc.mp4"))
            .await
            .unwrap();

        assert!(url.contains("response-content-disposition=attachment"));
    }

    #[tokio::test]
    async fn test_exists_maps_missing_key_to_false() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/videos/Avatars/present.mp4"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", "4"))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/videos/Avatars/missing.mp4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        assert!(client.exists("Avatars/present.mp4").await.unwrap());
        assert!(!client.exists("Avatars/missing.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_surfaces_other_errors() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        assert!(matches!(
            client.exists("Avatars/output_1.mp4").await,
            Err(StorageError::AwsSdk(_))
        ));
    }

    #[tokio::test]
    #[ignore = "requires S3-compatible storage"]
    async fn test_upload_and_delete_roundtrip() {
        let client = StorageClient::from_env().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.mp4");
        std::fs::write(&path, b"not really a video").unwrap();

        client.upload_file(&path, "roundtrip/roundtrip.mp4", "video/mp4").await.unwrap();
        assert!(client.exists("roundtrip/roundtrip.mp4").await.unwrap());
        client.delete_object("roundtrip/roundtrip.mp4").await.unwrap();
        assert!(!client.exists("roundtrip/roundtrip.mp4").await.unwrap());
    }
}
