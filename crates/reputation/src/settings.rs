//! Client tuning knobs.

use std::time::Duration;

/// Service API root.
pub const DEFAULT_API_URL: &str = "https://www.virustotal.com/api/v3";
/// Root of the human-facing report pages (permalinks).
pub const DEFAULT_GUI_URL: &str = "https://www.virustotal.com";
/// Public API allowance: four requests per minute.
pub const DEFAULT_QUOTA: usize = 4;
/// Largest file accepted by the plain (non upload-URL) upload endpoint.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 32 * 1024 * 1024;

/// Everything the client needs to know up front.
///
/// There is no global state; two clients with different settings can live
/// side by side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub api_url: String,
    pub gui_url: String,
    pub user_agent: String,
    /// Requests admitted per [`quota_window`](Self::quota_window).
    pub quota: usize,
    pub quota_window: Duration,
    /// Files larger than this are reported as `FileTooLarge` without being
    /// hashed or uploaded.
    pub max_file_size: u64,
    /// Per-attempt timeout.
    pub request_timeout: Duration,
    /// Attempts per request for timeouts and connection failures.
    pub attempts: u32,
    pub retry_delay: Duration,
    /// Sleep between analysis status polls.
    pub poll_interval: Duration,
    /// Ceiling on the whole polling phase, however fast individual polls are.
    pub analysis_timeout: Duration,
    /// Upload files the service has never seen. When disabled, `NotFound` is
    /// a final verdict.
    pub upload_unknown: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            gui_url: DEFAULT_GUI_URL.to_string(),
            user_agent: concat!("verdict/", env!("CARGO_PKG_VERSION")).to_string(),
            quota: DEFAULT_QUOTA,
            quota_window: Duration::from_secs(60),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            request_timeout: Duration::from_secs(30),
            attempts: 3,
            retry_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(5),
            analysis_timeout: Duration::from_secs(300),
            upload_unknown: true,
        }
    }
}
