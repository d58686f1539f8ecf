//! Request transport.
//!
//! Two traits form the seam between the client and the wire:
//!
//! - a [`Connector`] builds a [`Session`] for a given API key (for HTTP this
//!   is a connection pool with the `x-apikey` header baked in), and
//! - a [`Session`] executes one request and reports either a received
//!   response or a [`SendError`] meaning nothing was received.
//!
//! [`Transport`] owns the lazily created session, the bounded retry loop and
//! the classification of failures into [`ErrorKind`]s. Anything that got a
//! response back (other than 401/403) is returned untouched for the caller
//! to interpret.

mod http;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use self::http::HttpConnector;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::{MockConnector, RecordedRequest};
use crate::cancel::CancelHandle;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use derive_more::{Display, Error};
use exn::{Exn, ResultExt};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub type SessionHandle = Arc<dyn Session>;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Method {
    #[display("GET")]
    Get,
    #[display("POST")]
    Post,
}

/// File contents for a multipart upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// A request relative to the API root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the API root, starting with `/`.
    pub path: String,
    pub upload: Option<Upload>,
}
impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: Method::Get, path: path.into(), upload: None }
    }

    pub fn upload(path: impl Into<String>, upload: Upload) -> Self {
        Self { method: Method::Post, path: path.into(), upload: Some(upload) }
    }
}

/// Any response that made it back, whatever its status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}
impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as JSON, or `Null` if it isn't JSON at all.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or_else(|e| {
            tracing::warn!(status = self.status, error = %e, "Response body is not valid JSON");
            serde_json::Value::Null
        })
    }
}

/// Nothing came back from the service.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum SendError {
    #[display("timed out waiting for a response")]
    Timeout,
    #[display("could not connect")]
    Connect,
    /// The status line arrived but the body didn't. Never retried: the
    /// service has already acted on the request.
    #[display("response body could not be read: {_0}")]
    Body(#[error(not(source))] String),
    #[display("{_0}")]
    Other(#[error(not(source))] String),
}

/// One authenticated connection context.
#[async_trait]
pub trait Session: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> std::result::Result<ApiResponse, SendError>;
}

/// Builds sessions bound to a credential.
pub trait Connector: Send + Sync {
    fn connect(&self, api_key: &str) -> Result<SessionHandle>;
}

/// Attempt budget for failures where no response was received.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

#[derive(Default)]
struct SessionState {
    api_key: Option<String>,
    session: Option<SessionHandle>,
}

/// Retrying, classifying front to a [`Connector`].
pub struct Transport {
    connector: Arc<dyn Connector>,
    state: Mutex<SessionState>,
    retry: RetryPolicy,
    cancel: CancelHandle,
}

impl Transport {
    pub fn new(connector: Arc<dyn Connector>, api_key: Option<String>, retry: RetryPolicy, cancel: CancelHandle) -> Self {
        Self {
            connector,
            state: Mutex::new(SessionState { api_key: normalize_key(api_key), session: None }),
            retry,
            cancel,
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.lock().api_key.is_some()
    }

    /// Replace the credential and drop any session built with the old one.
    pub fn set_api_key(&self, api_key: Option<String>) {
        let mut state = self.lock();
        state.api_key = normalize_key(api_key);
        if state.session.take().is_some() {
            tracing::debug!("Credential changed; discarding transport session");
        }
    }

    /// Release the session. The next request reconnects.
    pub fn close(&self) {
        self.lock().session = None;
    }

    /// Issue `request`, retrying timeouts and connection failures.
    ///
    /// Cancellation is checked before every attempt and before every retry
    /// delay. 401 and 403 are turned into errors; every other received
    /// status is returned as-is.
    pub async fn request(&self, request: &ApiRequest) -> Result<ApiResponse> {
        for attempt in 1..=self.retry.attempts {
            if self.cancel.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            let session = self.session()?;
            let err = match session.execute(request).await {
                Ok(response) => return classify(response),
                Err(err) => err,
            };
            let kind = match &err {
                SendError::Timeout => ErrorKind::Timeout,
                SendError::Connect => ErrorKind::Connection,
                SendError::Body(_) | SendError::Other(_) => ErrorKind::Request(err.to_string()),
            };
            if !kind.is_retryable() || attempt == self.retry.attempts {
                tracing::warn!(method = %request.method, path = %request.path, attempt, error = %err, "Request failed");
                return Err(err).or_raise(|| kind);
            }
            tracing::debug!(method = %request.method, path = %request.path, attempt, error = %err, "Retrying request");
            if self.cancel.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            tokio::time::sleep(self.retry.delay).await;
        }
        // Only reachable with a zero attempt budget.
        Err(Exn::from(ErrorKind::NoResponse))
    }

    fn session(&self) -> Result<SessionHandle> {
        let mut state = self.lock();
        if let Some(session) = &state.session {
            return Ok(Arc::clone(session));
        }
        let Some(api_key) = &state.api_key else {
            exn::bail!(ErrorKind::MissingApiKey);
        };
        let session = self.connector.connect(api_key)?;
        tracing::debug!("Created transport session");
        state.session = Some(Arc::clone(&session));
        Ok(session)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn normalize_key(api_key: Option<String>) -> Option<String> {
    api_key.map(|key| key.trim().to_string()).filter(|key| !key.is_empty())
}

fn classify(response: ApiResponse) -> Result<ApiResponse> {
    match response.status {
        401 => Err(Exn::from(ErrorKind::InvalidCredential)),
        403 => Err(Exn::from(ErrorKind::InsufficientPermission)),
        _ => Ok(response),
    }
}
