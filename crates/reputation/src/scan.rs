//! The full scan of one local file.

use crate::client::Client;
use crate::digest::Sha256;
use crate::error::{ErrorKind, Result};
use crate::models::{ScanResult, ScanStatus};
use exn::ResultExt;
use std::path::Path;
use std::sync::Arc;
use tracing::instrument;

impl Client {
    /// Validate, hash and look up `path`, uploading it for analysis when the
    /// service has never seen it (and [`upload_unknown`] is set).
    ///
    /// Always produces a result; failures are reported through its status
    /// and `error_message`. A cancel requested before or during the scan
    /// yields an error result with the message `cancelled`, and the flag is
    /// cleared once the scan returns.
    ///
    /// [`upload_unknown`]: crate::Settings::upload_unknown
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn scan_file(&self, path: impl AsRef<Path>) -> ScanResult {
        let path = path.as_ref();
        let result = match self.scan_inner(path).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %*err, "Scan failed");
                ScanResult::failed(path, &err)
            },
        };
        self.cancel.reset();
        match result.status {
            ScanStatus::Detected => {
                tracing::info!(detections = result.detections, total = result.total_engines, "Threats detected")
            },
            status => tracing::info!(?status, "Scan finished"),
        }
        result
    }

    async fn scan_inner(&self, path: &Path) -> Result<ScanResult> {
        if !self.has_api_key() {
            exn::bail!(ErrorKind::MissingApiKey);
        }
        if self.cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let metadata = tokio::fs::metadata(path).await.map_err(|err| ErrorKind::from_io(err, path))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotAFile(path.to_path_buf()));
        }
        let size = metadata.len();
        if size == 0 {
            exn::bail!(ErrorKind::EmptyFile(path.to_path_buf()));
        }
        if size > self.settings.max_file_size {
            exn::bail!(ErrorKind::FileTooLarge { size, limit: self.settings.max_file_size });
        }

        let digest = self.digest(path).await?;
        tracing::debug!(%digest, size, "Hashed file");
        let result = self.lookup_digest(&digest).await.with_file_path(path);
        if result.status == ScanStatus::NotFound && self.settings.upload_unknown {
            return Ok(self.upload_and_analyze(path, &digest).await);
        }
        Ok(result)
    }

    /// Hash off the async workers; files can be tens of megabytes.
    async fn digest(&self, path: &Path) -> Result<Sha256> {
        let hasher = Arc::clone(&self.hasher);
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || hasher.hash_file(&owned))
            .await
            .or_raise(|| ErrorKind::Runtime)?
    }
}

#[cfg(test)]
mod tests {
    use crate::client::Client;
    use crate::client::tests::{client, settings};
    use crate::digest::{FileHasher, Sha256, sha256_file};
    use crate::error::{ErrorKind, Result};
    use crate::models::ScanStatus;
    use crate::transport::{Method, MockConnector};
    use rstest::rstest;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const REPORT_DETECTED: &str = r#"{"data": {"attributes": {
        "last_analysis_stats": {"malicious": 5, "suspicious": 2, "undetected": 63, "harmless": 0},
        "last_analysis_results": {"A": {"category": "malicious", "result": "Eicar"}}
    }}}"#;
    const REPORT_CLEAN: &str =
        r#"{"data": {"attributes": {"last_analysis_stats": {"malicious": 0, "suspicious": 0, "undetected": 70, "harmless": 0}}}}"#;

    #[derive(Default)]
    struct CountingHasher {
        calls: AtomicUsize,
    }
    impl FileHasher for CountingHasher {
        fn hash_file(&self, path: &Path) -> Result<Sha256> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            sha256_file(path)
        }
    }

    /// Reports the file as unreadable, whatever it is.
    struct DeniedHasher;
    impl FileHasher for DeniedHasher {
        fn hash_file(&self, path: &Path) -> Result<Sha256> {
            Err(ErrorKind::PermissionDenied(path.to_path_buf()).into())
        }
    }

    fn write(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test(start_paused = true)]
    async fn test_known_file_skips_upload() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "eicar.com", b"pretend this is eicar");
        let mock = MockConnector::new().reply(200, REPORT_DETECTED);
        let result = client(&mock).scan_file(&path).await;

        assert_eq!(result.status, ScanStatus::Detected);
        assert_eq!(result.detections, 7);
        assert_eq!(result.file_path, path);
        let digest = sha256_file(&path).unwrap();
        assert_eq!(result.permalink, Some(digest.permalink("https://gui.example.test")));

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Get);
        assert_eq!(requests[0].path, format!("/files/{digest}"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_file_is_uploaded() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "fresh.bin", b"never seen before");
        let mock = MockConnector::new()
            .reply(404, "{}")
            .reply(200, r#"{"data": {"id": "an-9"}}"#)
            .reply(200, r#"{"data": {"attributes": {"status": "completed"}}}"#)
            .reply(200, REPORT_CLEAN);
        let result = client(&mock).scan_file(&path).await;

        assert_eq!(result.status, ScanStatus::Clean);
        assert_eq!(result.file_path, path);
        let methods: Vec<_> = mock.requests().iter().map(|r| r.method).collect();
        assert_eq!(methods, [Method::Get, Method::Post, Method::Get, Method::Get]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_file_without_upload() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "fresh.bin", b"never seen before");
        let mock = MockConnector::new().reply(404, "{}");
        let client = Client::new(
            crate::Settings { upload_unknown: false, ..settings() },
            Arc::new(mock.clone()),
            Some("test-key".to_string()),
        );
        let result = client.scan_file(&path).await;
        assert_eq!(result.status, ScanStatus::NotFound);
        assert!(result.permalink.is_some());
        assert!(result.error_message.is_none());
        assert_eq!(mock.requests().len(), 1);
    }

    #[rstest]
    #[case::missing(None, "file not found")]
    #[case::empty(Some(&b""[..]), "file is empty")]
    #[tokio::test(start_paused = true)]
    async fn test_invalid_input_sends_nothing(#[case] contents: Option<&[u8]>, #[case] prefix: &str) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input.bin");
        if let Some(contents) = contents {
            fs::write(&path, contents).unwrap();
        }
        let mock = MockConnector::new().otherwise(200, REPORT_CLEAN);
        let result = client(&mock).scan_file(&path).await;
        assert_eq!(result.status, ScanStatus::Error);
        assert!(result.error_message.unwrap().starts_with(prefix));
        assert!(result.permalink.is_none());
        assert!(mock.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_directory_is_not_a_file() {
        let dir = TempDir::new().unwrap();
        let mock = MockConnector::new().otherwise(200, REPORT_CLEAN);
        let result = client(&mock).scan_file(dir.path()).await;
        assert!(result.error_message.unwrap().starts_with("not a file"));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_file_is_not_hashed() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "big.bin", &[0u8; 2048]);
        let hasher = Arc::new(CountingHasher::default());
        let mock = MockConnector::new().otherwise(200, REPORT_CLEAN);
        let client = client(&mock).with_hasher(hasher.clone());

        let result = client.scan_file(&path).await;
        assert_eq!(result.status, ScanStatus::FileTooLarge);
        assert_eq!(
            result.error_message.as_deref(),
            Some("file too large: 2048 bytes exceeds the 1024 byte limit")
        );
        assert_eq!(hasher.calls.load(Ordering::SeqCst), 0);
        assert!(mock.requests().is_empty());

        // Exactly at the limit is fine.
        let path = write(&dir, "edge.bin", &[1u8; 1024]);
        assert_eq!(client.scan_file(&path).await.status, ScanStatus::Clean);
        assert_eq!(hasher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_digest_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "locked.bin", b"abc");
        let mock = MockConnector::new().otherwise(200, REPORT_CLEAN);
        let result = client(&mock).with_hasher(Arc::new(DeniedHasher)).scan_file(&path).await;

        assert_eq!(result.status, ScanStatus::Error);
        assert_eq!(result.error_message, Some(format!("permission denied: {}", path.display())));
        assert!(result.permalink.is_none());
        assert!(mock.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_key_fails_fast() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.bin", b"abc");
        let mock = MockConnector::new().otherwise(200, REPORT_CLEAN);
        let client = Client::new(settings(), Arc::new(mock.clone()), None);
        let result = client.scan_file(&path).await;
        assert_eq!(result.error_message.as_deref(), Some("API key required"));
        assert_eq!(mock.sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_scan_then_recover() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.bin", b"abc");
        let mock = MockConnector::new().otherwise(200, REPORT_CLEAN);
        let client = client(&mock);

        client.cancel();
        let result = client.scan_file(&path).await;
        assert_eq!(result.status, ScanStatus::Error);
        assert_eq!(result.error_message.as_deref(), Some("cancelled"));
        assert!(mock.requests().is_empty());

        assert_eq!(client.scan_file(&path).await.status, ScanStatus::Clean);
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_rotation_between_scans() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.bin", b"abc");
        let mock = MockConnector::new().otherwise(200, REPORT_CLEAN);
        let client = client(&mock);

        client.scan_file(&path).await;
        client.set_api_key(Some("rotated".to_string()));
        client.scan_file(&path).await;

        let keys: Vec<_> = mock.requests().into_iter().map(|r| r.api_key).collect();
        assert_eq!(keys, ["test-key", "rotated"]);
        assert_eq!(mock.sessions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_is_shared_across_scans() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.bin", b"abc");
        let mock = MockConnector::new().otherwise(200, REPORT_CLEAN);
        let client = Client::new(
            crate::Settings { quota: 2, ..settings() },
            Arc::new(mock.clone()),
            Some("test-key".to_string()),
        );
        let started = tokio::time::Instant::now();
        for _ in 0..3 {
            assert_eq!(client.scan_file(&path).await.status, ScanStatus::Clean);
        }
        // The third lookup had to wait for the first to leave the window.
        assert!(started.elapsed() >= client.settings().quota_window);
        assert_eq!(mock.requests().len(), 3);
    }
}
