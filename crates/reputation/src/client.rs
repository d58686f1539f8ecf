//! The long-lived reputation client.

use crate::cancel::CancelHandle;
use crate::digest::{FileHasher, Sha256Hasher};
use crate::limiter::RateLimiter;
use crate::settings::Settings;
use crate::transport::{Connector, HttpConnector, RetryPolicy, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Longest single sleep while waiting for request quota.
const QUOTA_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Supplies the API key; the settings store lives elsewhere.
pub trait CredentialSource {
    /// The configured key, or `None` when there isn't one.
    fn api_key(&self) -> Option<String>;
}
impl CredentialSource for Option<String> {
    fn api_key(&self) -> Option<String> {
        self.clone()
    }
}
impl CredentialSource for str {
    fn api_key(&self) -> Option<String> {
        Some(self.to_string())
    }
}

/// One client per credential, created once and reused across scans.
///
/// All state is internally synchronised: [`cancel`](Self::cancel) and
/// [`set_api_key`](Self::set_api_key) can be called from any thread. Separate
/// scans against the same client should be serialised by the caller (they
/// share a single cancellation flag), though the rate limiter stays correct
/// either way.
///
/// # Examples
///
/// ```no_run
/// use verdict_reputation::{Client, Settings};
///
/// # async fn example() {
/// let client = Client::http(Settings::default(), Some("my-api-key".to_string()));
/// let result = client.scan_file("/tmp/suspicious.exe").await;
/// if result.has_threats() {
///     println!("{} engines flagged it: {:?}", result.detections, result.permalink);
/// }
/// # }
/// ```
pub struct Client {
    pub(crate) settings: Settings,
    pub(crate) transport: Transport,
    pub(crate) limiter: RateLimiter,
    pub(crate) cancel: CancelHandle,
    pub(crate) hasher: Arc<dyn FileHasher>,
    runtime: Option<Handle>,
}

impl Client {
    /// Create a client on top of any [`Connector`].
    pub fn new(settings: Settings, connector: Arc<dyn Connector>, api_key: Option<String>) -> Self {
        let cancel = CancelHandle::new();
        let retry = RetryPolicy {
            attempts: settings.attempts,
            delay: settings.retry_delay,
        };
        let transport = Transport::new(connector, api_key, retry, cancel.clone());
        let limiter = RateLimiter::new(settings.quota, settings.quota_window, QUOTA_POLL_INTERVAL);
        Self {
            settings,
            transport,
            limiter,
            cancel,
            hasher: Arc::new(Sha256Hasher),
            runtime: Handle::try_current().ok(),
        }
    }

    /// Create a client talking HTTPS to `settings.api_url`.
    pub fn http(settings: Settings, api_key: Option<String>) -> Self {
        let connector = HttpConnector::new(&settings.api_url, settings.request_timeout, &settings.user_agent);
        Self::new(settings, Arc::new(connector), api_key)
    }

    /// Create an HTTPS client with the key from `credentials`.
    pub fn from_credentials(settings: Settings, credentials: &(impl CredentialSource + ?Sized)) -> Self {
        Self::http(settings, credentials.api_key())
    }

    /// Replace the digest implementation.
    pub fn with_hasher(mut self, hasher: Arc<dyn FileHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Runtime used by [`scan_file_async`](Self::scan_file_async) when the
    /// caller isn't on one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn has_api_key(&self) -> bool {
        self.transport.has_api_key()
    }

    /// Swap the credential. Any session built with the old key is dropped, so
    /// the next request reconnects. Not meant to race an in-flight scan.
    pub fn set_api_key(&self, api_key: Option<String>) {
        self.transport.set_api_key(api_key);
    }

    /// Request cancellation of the current (or, if idle, the next) scan.
    pub fn cancel(&self) {
        tracing::debug!("Cancellation requested");
        self.cancel.cancel();
    }

    /// A handle that can cancel scans from anywhere without holding the client.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Release the transport session. The client remains usable; the next
    /// request reconnects. Dropping the client releases it too.
    pub fn close(&self) {
        self.transport.close();
    }

    pub(crate) fn runtime(&self) -> Option<Handle> {
        self.runtime.clone().or_else(|| Handle::try_current().ok())
    }

    /// Wait for quota, honouring cancellation.
    pub(crate) async fn admit(&self) -> crate::error::Result<()> {
        if !self.limiter.wait_for_quota(&self.cancel).await {
            exn::bail!(crate::error::ErrorKind::Cancelled);
        }
        Ok(())
    }
}
