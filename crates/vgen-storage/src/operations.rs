//! High-level storage operations for generated videos.

use std::path::Path;

use tracing::info;

use crate::client::StorageClient;
use crate::error::{StorageError, StorageResult};

/// Content type of uploaded videos.
pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

impl StorageClient {
    /// Object key for a video file: `<prefix>/<file_name>`.
    pub fn video_key(&self, file_name: &str) -> StorageResult<String> {
        build_key(&self.config().key_prefix, file_name)
    }

    /// Upload a video file and return its object key.
    pub async fn upload_video(&self, path: impl AsRef<Path>, file_name: &str) -> StorageResult<String> {
        let key = self.video_key(file_name)?;
        self.upload_file(path, &key, VIDEO_CONTENT_TYPE).await?;
        Ok(key)
    }

    /// Signed download URL for a stored video, valid for the configured TTL.
    pub async fn signed_video_url(&self, key: &str) -> StorageResult<String> {
        let download_name = key.rsplit('/').next().filter(|s| !s.is_empty());
        let url = self
            .presign_get(key, self.config().signed_url_ttl, download_name)
            .await?;

        info!(
            key,
            ttl_secs = self.config().signed_url_ttl.as_secs(),
            "Created signed video URL"
        );
        Ok(url)
    }
}

fn build_key(prefix: &str, file_name: &str) -> StorageResult<String> {
    if file_name.is_empty() || file_name.contains('/') || file_name.contains("..") {
        return Err(StorageError::invalid_key(file_name));
    }

    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        Ok(file_name.to_string())
    } else {
        Ok(format!("{}/{}", prefix, file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{client_for, local_client};

    #[test]
    fn test_build_key() {
        assert_eq!(build_key("Avatars", "output_1.mp4").unwrap(), "Avatars/output_1.mp4");
        assert_eq!(build_key("/videos/", "output_1.mp4").unwrap(), "videos/output_1.mp4");
        assert_eq!(build_key("", "output_1.mp4").unwrap(), "output_1.mp4");
    }

    #[test]
    fn test_build_key_rejects_paths() {
        assert!(build_key("Avatars", "").is_err());
        assert!(build_key("Avatars", "../secret.mp4").is_err());
        assert!(build_key("Avatars", "a/b.mp4").is_err());
    }

    #[tokio::test]
    async fn test_signed_video_url_uses_ttl_and_download_name() {
        let client = local_client();
        let key = client.video_key("output_abc.mp4").unwrap();
        let url = client.signed_video_url(&key).await.unwrap();

        assert!(url.contains("/videos/Avatars/output_abc.mp4?"));
        assert!(url.contains("X-Amz-Expires=86400"));
        assert!(url.contains("output_abc.mp4%22") || url.contains("output_abc.mp4\""));
    }

    #[tokio::test]
    async fn test_upload_video_puts_mp4_under_prefix() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/videos/Avatars/output_abc.mp4"))
            .and(header("content-type", VIDEO_CONTENT_TYPE))
            .and(header("cache-control", "max-age=3600"))
            .respond_with(ResponseTemplate::new(200).insert_header("etag", "\"abc\""))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("output_abc.mp4");
        std::fs::write(&video, b"\x00\x00\x00\x18ftypmp42").unwrap();

        let client = client_for(&server.uri());
        let key = client.upload_video(&video, "output_abc.mp4").await.unwrap();
        assert_eq!(key, "Avatars/output_abc.mp4");

        let url = client.signed_video_url(&key).await.unwrap();
        assert!(url.starts_with(&format!("{}/videos/Avatars/output_abc.mp4?", server.uri())));
        assert!(url.contains("response-content-disposition=attachment"));
    }

    #[tokio::test]
    async fn test_upload_video_rejects_bad_name_without_request() {
        let client = local_client();
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"x").unwrap();

        let err = client.upload_video(&video, "../clip.mp4").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
