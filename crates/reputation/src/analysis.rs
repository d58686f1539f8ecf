//! Upload-and-poll for files the service has never seen.

use crate::client::Client;
use crate::digest::Sha256;
use crate::error::{ErrorKind, Result};
use crate::models::ScanResult;
use crate::transport::{ApiRequest, ApiResponse, Upload};
use exn::{Exn, OptionExt};
use std::path::Path;
use tokio::time::Instant;
use tracing::instrument;

impl Client {
    /// Submit `path` for analysis, wait for it to finish, then fetch the
    /// fresh report.
    ///
    /// Any failure along the way (including cancellation and the analysis
    /// ceiling) becomes an error-family result carrying the permalink.
    #[instrument(skip(self, path, digest), fields(path = %path.display(), digest = %digest))]
    pub(crate) async fn upload_and_analyze(&self, path: &Path, digest: &Sha256) -> ScanResult {
        match self.analyze(path, digest).await {
            Ok(()) => self.lookup_digest(digest).await.with_file_path(path),
            Err(err) => {
                tracing::warn!(error = %*err, "Analysis did not complete");
                ScanResult::failed(path, &err).with_permalink(&self.settings.gui_url, digest)
            },
        }
    }

    async fn analyze(&self, path: &Path, digest: &Sha256) -> Result<()> {
        // The file may have gone away since it was hashed.
        tokio::fs::metadata(path).await.map_err(|err| ErrorKind::from_io(err, path))?;
        if self.cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let bytes = tokio::fs::read(path).await.map_err(|err| ErrorKind::from_io(err, path))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| digest.to_string());

        self.admit().await?;
        tracing::info!(bytes = bytes.len(), "Uploading file for analysis");
        let response = self.transport.request(&ApiRequest::upload("/files", Upload { file_name, bytes })).await?;
        let analysis_id = analysis_id(&success(response)?)?;
        tracing::debug!(%analysis_id, "Upload accepted");
        self.wait_for_analysis(&analysis_id).await
    }

    /// Poll `/analyses/{id}` until it reports `completed`.
    async fn wait_for_analysis(&self, analysis_id: &str) -> Result<()> {
        let started = Instant::now();
        let request = ApiRequest::get(format!("/analyses/{analysis_id}"));
        loop {
            if self.cancel.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            if started.elapsed() >= self.settings.analysis_timeout {
                exn::bail!(ErrorKind::AnalysisTimeout);
            }
            self.admit().await?;
            let report = success(self.transport.request(&request).await?)?.json();
            match report["data"]["attributes"]["status"].as_str() {
                Some("completed") => {
                    tracing::debug!(elapsed = ?started.elapsed(), "Analysis completed");
                    return Ok(());
                },
                Some(status @ ("queued" | "in-progress")) => tracing::debug!(status, "Analysis pending"),
                other => tracing::warn!(status = ?other, "Unrecognised analysis status; still waiting"),
            }
            if self.cancel.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

fn success(response: ApiResponse) -> Result<ApiResponse> {
    match response.status {
        _ if response.is_success() => Ok(response),
        429 => Err(Exn::from(ErrorKind::RateLimited)),
        status => Err(Exn::from(ErrorKind::UnexpectedStatus(status))),
    }
}

fn analysis_id(response: &ApiResponse) -> Result<String> {
    let id = response.json()["data"]["id"].as_str().map(str::to_string);
    id.ok_or_raise(|| ErrorKind::InvalidResponse("upload response has no analysis id".to_string()))
}
