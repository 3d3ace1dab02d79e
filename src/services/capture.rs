//! Camera snapshot capture adapters.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::{CaptureConfig, CaptureKind};
use crate::constants::network::MAX_SNAPSHOT_BYTES;
use crate::types::{Result, TidyError};

#[async_trait]
pub trait ImageCapture: Send + Sync {
    /// Fetch the current snapshot for a camera reference
    async fn capture(&self, camera: &str) -> Result<Vec<u8>>;
}

pub type SharedCapture = Arc<dyn ImageCapture>;

/// Build the capture adapter selected in configuration
pub fn create_capture(config: &CaptureConfig) -> Result<SharedCapture> {
    match config.kind {
        CaptureKind::File => Ok(Arc::new(FileCapture::new(&config.base_dir))),
        CaptureKind::Http => Ok(Arc::new(HttpCapture::new(Duration::from_secs(
            config.timeout_secs,
        ))?)),
    }
}

fn check_snapshot(camera: &str, bytes: Vec<u8>) -> Result<Vec<u8>> {
    if bytes.is_empty() {
        return Err(TidyError::capture(camera, "snapshot is empty"));
    }
    if bytes.len() > MAX_SNAPSHOT_BYTES {
        return Err(TidyError::capture(
            camera,
            format!("snapshot is {} bytes, limit {}", bytes.len(), MAX_SNAPSHOT_BYTES),
        ));
    }
    Ok(bytes)
}

// =============================================================================
// File
// =============================================================================

/// Reads snapshots written to disk by an external camera integration
#[derive(Debug, Clone)]
pub struct FileCapture {
    base_dir: PathBuf,
}

impl FileCapture {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, camera: &str) -> PathBuf {
        let path = Path::new(camera);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[async_trait]
impl ImageCapture for FileCapture {
    async fn capture(&self, camera: &str) -> Result<Vec<u8>> {
        let path = self.resolve(camera);
        debug!(camera, path = %path.display(), "Reading snapshot");
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| TidyError::capture(camera, format!("{}: {}", path.display(), e)))?;
        check_snapshot(camera, bytes)
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// Downloads snapshots from camera HTTP endpoints
#[derive(Debug, Clone)]
pub struct HttpCapture {
    client: reqwest::Client,
}

impl HttpCapture {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TidyError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn validate_url(camera: &str) -> Result<Url> {
        let url = Url::parse(camera)
            .map_err(|e| TidyError::capture(camera, format!("invalid snapshot URL: {}", e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(TidyError::capture(
                camera,
                format!("unsupported scheme '{}'", other),
            )),
        }
    }
}

#[async_trait]
impl ImageCapture for HttpCapture {
    async fn capture(&self, camera: &str) -> Result<Vec<u8>> {
        let url = Self::validate_url(camera)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TidyError::capture(camera, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TidyError::capture(camera, format!("HTTP {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TidyError::capture(camera, e.to_string()))?;
        check_snapshot(camera, bytes.to_vec())
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Serves fixed snapshots from memory
#[derive(Debug, Default)]
pub struct StaticCapture {
    images: DashMap<String, Vec<u8>>,
    delay: Option<Duration>,
}

impl StaticCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, camera: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.images.insert(camera.into(), bytes.into());
        self
    }

    /// Simulated capture latency
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace the snapshot a camera returns
    pub fn set_image(&self, camera: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.images.insert(camera.into(), bytes.into());
    }
}

#[async_trait]
impl ImageCapture for StaticCapture {
    async fn capture(&self, camera: &str) -> Result<Vec<u8>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let bytes = self
            .images
            .get(camera)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TidyError::capture(camera, "camera offline"))?;
        check_snapshot(camera, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_capture_relative_and_absolute() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("kitchen.jpg"), b"jpeg-bytes").unwrap();

        let capture = FileCapture::new(dir.path());
        assert_eq!(capture.capture("kitchen.jpg").await.unwrap(), b"jpeg-bytes");

        let absolute = dir.path().join("kitchen.jpg");
        let absolute = absolute.to_string_lossy();
        assert_eq!(capture.capture(&absolute).await.unwrap(), b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_file_capture_missing_is_capture_error() {
        let dir = TempDir::new().unwrap();
        let capture = FileCapture::new(dir.path());
        let err = capture.capture("garage.jpg").await.unwrap_err();
        assert!(matches!(err, TidyError::Capture { ref camera, .. } if camera == "garage.jpg"));
    }

    #[tokio::test]
    async fn test_empty_snapshot_rejected() {
        let capture = StaticCapture::new().with_image("cam", Vec::<u8>::new());
        assert!(capture.capture("cam").await.is_err());
    }

    #[tokio::test]
    async fn test_static_capture_offline_camera() {
        let capture = StaticCapture::new().with_image("cam", b"x".to_vec());
        assert!(capture.capture("cam").await.is_ok());
        assert!(matches!(
            capture.capture("other").await,
            Err(TidyError::Capture { .. })
        ));
    }

    #[test]
    fn test_http_url_validation() {
        assert!(HttpCapture::validate_url("http://cam.local/snapshot.jpg").is_ok());
        assert!(HttpCapture::validate_url("ftp://cam.local/snapshot.jpg").is_err());
        assert!(HttpCapture::validate_url("not a url").is_err());
    }
}
