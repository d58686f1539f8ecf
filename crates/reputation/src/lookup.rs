//! Hash lookups against `/files/{sha256}`.

use crate::client::Client;
use crate::digest::Sha256;
use crate::error::{ErrorKind, Result};
use crate::models::{Detection, ScanResult};
use crate::transport::ApiRequest;
use exn::Exn;
use serde_json::Value;
use tracing::instrument;

/// Engine categories that count as a detection.
const FLAGGED: [&str; 2] = ["malicious", "suspicious"];

impl Client {
    /// Look up the service's latest report for `digest`.
    ///
    /// Never fails: transport errors, quota and cancellation all come back
    /// as error-family results. The permalink is set in every case. The
    /// result's `file_path` is the digest itself. Like
    /// [`scan_file`](Self::scan_file), a pending cancel applies to this call
    /// only and is cleared on return.
    pub async fn lookup(&self, digest: &Sha256) -> ScanResult {
        let result = self.lookup_digest(digest).await;
        self.cancel.reset();
        result
    }

    /// Lookup as one step of a larger operation; leaves the cancel flag alone.
    #[instrument(skip(self, digest), fields(digest = %digest))]
    pub(crate) async fn lookup_digest(&self, digest: &Sha256) -> ScanResult {
        let result = match self.lookup_inner(digest).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %*err, "Hash lookup failed");
                ScanResult::failed(digest.as_str(), &err)
            },
        };
        result.with_permalink(&self.settings.gui_url, digest)
    }

    async fn lookup_inner(&self, digest: &Sha256) -> Result<ScanResult> {
        self.admit().await?;
        let response = self.transport.request(&ApiRequest::get(format!("/files/{digest}"))).await?;
        match response.status {
            200 => Ok(parse_file_report(digest.as_str(), &response.json())),
            404 => {
                tracing::debug!("Digest unknown to the service");
                Ok(ScanResult::not_found(digest.as_str()))
            },
            429 => Err(Exn::from(ErrorKind::RateLimited)),
            status => Err(Exn::from(ErrorKind::UnexpectedStatus(status))),
        }
    }
}

/// Turn a file report into a verdict.
///
/// Every level of the document is optional: missing or mistyped fields
/// count as zero/absent, so a malformed report degrades to a clean verdict
/// with no engines rather than an error.
pub(crate) fn parse_file_report(file_path: &str, report: &Value) -> ScanResult {
    let attributes = &report["data"]["attributes"];
    let stats = &attributes["last_analysis_stats"];
    let count = |bucket: &str| stats[bucket].as_u64().unwrap_or(0);
    let detections = count("malicious").saturating_add(count("suspicious"));
    let total = detections.saturating_add(count("undetected")).saturating_add(count("harmless"));

    let details = match attributes["last_analysis_results"].as_object() {
        Some(engines) => engines
            .iter()
            .filter_map(|(engine, entry)| {
                let category = entry["category"].as_str()?;
                FLAGGED.contains(&category).then(|| Detection {
                    engine_name: entry["engine_name"].as_str().unwrap_or(engine).to_string(),
                    category: category.to_string(),
                    result: entry["result"].as_str().map(str::to_string),
                })
            })
            .collect(),
        None => Vec::new(),
    };
    if stats.is_null() {
        tracing::warn!("File report has no analysis stats; treating as clean");
    }
    ScanResult::verdict(file_path, clamp(detections), clamp(total), details)
}

/// Engine counts are reported as `u32`; absurd values pin to the maximum
/// rather than wrapping.
fn clamp(count: u64) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::client;
    use crate::models::ScanStatus;
    use crate::transport::{MockConnector, SendError};
    use rstest::rstest;
    use serde_json::json;

    const DIGEST: &str = "275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f";
    const PERMALINK: &str =
        "https://gui.example.test/gui/file/275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f";

    fn digest() -> Sha256 {
        Sha256::parse(DIGEST).unwrap()
    }

    fn detected_report() -> Value {
        json!({"data": {"attributes": {
            "last_analysis_stats": {"malicious": 5, "suspicious": 2, "undetected": 63, "harmless": 0},
            "last_analysis_results": {
                "EngineA": {"category": "malicious", "result": "Trojan.Generic", "engine_name": "EngineA"},
                "EngineB": {"category": "malicious", "result": "Win32.Evil"},
                "EngineC": {"category": "malicious", "result": "Eicar"},
                "EngineD": {"category": "malicious", "result": null},
                "EngineE": {"category": "malicious", "result": "Agent"},
                "EngineF": {"category": "suspicious", "result": "Heur.Packed"},
                "EngineG": {"category": "suspicious", "result": null},
                "EngineH": {"category": "undetected", "result": null},
                "EngineI": {"category": "harmless", "result": null},
                "EngineJ": {"category": "type-unsupported", "result": null}
            }
        }}})
    }

    #[test]
    fn test_parse_detected() {
        let result = parse_file_report(DIGEST, &detected_report());
        assert_eq!(result.status, ScanStatus::Detected);
        assert_eq!(result.detections, 7);
        assert_eq!(result.total_engines, 70);
        assert_eq!(result.detection_details.len(), 7);
        assert!(result.detection_details.iter().all(|d| FLAGGED.contains(&d.category.as_str())));
        let engine_d = result.detection_details.iter().find(|d| d.engine_name == "EngineD").unwrap();
        assert_eq!(engine_d.result, None);
        assert!(result.error_message.is_none());
    }

    #[rstest]
    #[case(json!(null))]
    #[case(json!({}))]
    #[case(json!({"data": null}))]
    #[case(json!({"data": {"attributes": {}}}))]
    #[case(json!({"data": {"attributes": {"last_analysis_stats": "nonsense"}}}))]
    #[case(json!({"data": {"attributes": {"last_analysis_results": [1, 2, 3]}}}))]
    fn test_parse_malformed_is_clean(#[case] report: Value) {
        let result = parse_file_report(DIGEST, &report);
        assert_eq!(result.status, ScanStatus::Clean);
        assert_eq!(result.detections, 0);
        assert_eq!(result.total_engines, 0);
        assert!(result.detection_details.is_empty());
    }

    #[test]
    fn test_parse_partial_stats() {
        let report = json!({"data": {"attributes": {"last_analysis_stats": {"malicious": 1, "harmless": "x"}}}});
        let result = parse_file_report(DIGEST, &report);
        assert_eq!(result.status, ScanStatus::Detected);
        assert_eq!(result.detections, 1);
        assert_eq!(result.total_engines, 1);
    }

    #[rstest]
    #[case::wide_malicious(json!({"malicious": 4_294_967_296_u64}), u32::MAX, u32::MAX)]
    #[case::sum_past_max(json!({"malicious": 4_294_967_295_u64, "suspicious": 1}), u32::MAX, u32::MAX)]
    #[case::total_past_max(json!({"malicious": 1, "undetected": u64::MAX, "harmless": u64::MAX}), 1, u32::MAX)]
    fn test_parse_oversized_counts_saturate(
        #[case] stats: Value,
        #[case] detections: u32,
        #[case] total: u32,
    ) {
        let report = json!({"data": {"attributes": {"last_analysis_stats": stats}}});
        let result = parse_file_report(DIGEST, &report);
        assert_eq!(result.status, ScanStatus::Detected);
        assert_eq!(result.detections, detections);
        assert_eq!(result.total_engines, total);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_detected() {
        let mock = MockConnector::new().reply(200, detected_report().to_string());
        let result = client(&mock).lookup(&digest()).await;
        assert_eq!(result.status, ScanStatus::Detected);
        assert_eq!(result.detections, 7);
        assert_eq!(result.permalink.as_deref(), Some(PERMALINK));
        assert_eq!(mock.requests()[0].path, format!("/files/{DIGEST}"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_garbage_body_is_clean() {
        let mock = MockConnector::new().reply(200, "<html>definitely not json</html>");
        let result = client(&mock).lookup(&digest()).await;
        assert_eq!(result.status, ScanStatus::Clean);
        assert_eq!(result.permalink.as_deref(), Some(PERMALINK));
    }

    #[rstest]
    #[case(404, ScanStatus::NotFound, None)]
    #[case(429, ScanStatus::RateLimited, Some("rate limit exceeded"))]
    #[case(500, ScanStatus::Error, Some("unexpected HTTP status 500"))]
    #[case(401, ScanStatus::Error, Some("invalid API key"))]
    #[case(403, ScanStatus::Error, Some("insufficient permission for this API key"))]
    #[tokio::test(start_paused = true)]
    async fn test_lookup_status_mapping(
        #[case] status: u16,
        #[case] expected: ScanStatus,
        #[case] message: Option<&str>,
    ) {
        let mock = MockConnector::new().reply(status, "{}");
        let result = client(&mock).lookup(&digest()).await;
        assert_eq!(result.status, expected);
        assert_eq!(result.error_message.as_deref(), message);
        // Permalink is independent of whether the lookup worked.
        assert_eq!(result.permalink.as_deref(), Some(PERMALINK));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_transport_failure() {
        let mock = MockConnector::new()
            .fail(SendError::Connect)
            .fail(SendError::Connect)
            .fail(SendError::Connect);
        let result = client(&mock).lookup(&digest()).await;
        assert_eq!(result.status, ScanStatus::Error);
        assert_eq!(result.error_message.as_deref(), Some("connection failed"));
        assert_eq!(mock.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_cancelled_sends_nothing() {
        let mock = MockConnector::new().reply(200, "{}");
        let client = client(&mock);
        client.cancel();
        let result = client.lookup(&digest()).await;
        assert_eq!(result.error_message.as_deref(), Some("cancelled"));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_applies_to_one_lookup() {
        let mock = MockConnector::new().otherwise(404, "{}");
        let client = client(&mock);
        client.cancel();
        assert_eq!(client.lookup(&digest()).await.error_message.as_deref(), Some("cancelled"));

        for _ in 0..2 {
            assert_eq!(client.lookup(&digest()).await.status, ScanStatus::NotFound);
        }
        assert_eq!(mock.requests().len(), 2);
    }
}
