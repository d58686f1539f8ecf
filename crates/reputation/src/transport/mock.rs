//! Scripted in-memory transport for testing.

use super::{ApiRequest, ApiResponse, Connector, Method, SendError, Session, SessionHandle};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type Hook = Arc<dyn Fn(&ApiRequest) + Send + Sync>;
type Reply = std::result::Result<ApiResponse, SendError>;

/// What a [`MockConnector`] saw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    /// Credential of the session that sent it.
    pub api_key: String,
    /// Size of the multipart upload, if any.
    pub upload_size: Option<usize>,
}

#[derive(Default)]
struct MockState {
    script: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Option<ApiResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
    hook: Mutex<Option<Hook>>,
    sessions: AtomicUsize,
}

/// Connector whose sessions answer from a script.
///
/// Replies are consumed in order across all sessions. Once the script runs
/// out, the [`otherwise`](Self::otherwise) response is repeated forever; with
/// no fallback, requests fail with [`SendError::Other`]. Clones share state,
/// so keep one around to inspect what the client sent.
///
/// # Examples
///
/// ```
/// # #[cfg(feature = "mock")] {
/// use verdict_reputation::transport::MockConnector;
///
/// let mock = MockConnector::new()
///     .reply(404, "{}")
///     .reply(200, r#"{"data":{"id":"abc"}}"#)
///     .otherwise(200, r#"{"data":{"attributes":{"status":"queued"}}}"#);
/// assert_eq!(mock.sessions(), 0);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a received response.
    pub fn reply(self, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.push(Ok(ApiResponse::new(status, body)))
    }

    /// Queue a failure where nothing was received.
    pub fn fail(self, error: SendError) -> Self {
        self.push(Err(error))
    }

    /// Response used once the script is exhausted.
    pub fn otherwise(self, status: u16, body: impl Into<Vec<u8>>) -> Self {
        *lock(&self.state.fallback) = Some(ApiResponse::new(status, body));
        self
    }

    /// Called with every request before it is answered.
    pub fn on_request(self, hook: impl Fn(&ApiRequest) + Send + Sync + 'static) -> Self {
        *lock(&self.state.hook) = Some(Arc::new(hook));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state.requests).clone()
    }

    /// Number of sessions created so far.
    pub fn sessions(&self) -> usize {
        self.state.sessions.load(Ordering::SeqCst)
    }

    fn push(self, reply: Reply) -> Self {
        lock(&self.state.script).push_back(reply);
        self
    }
}

impl Connector for MockConnector {
    fn connect(&self, api_key: &str) -> Result<SessionHandle> {
        self.state.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockSession {
            api_key: api_key.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockSession {
    api_key: String,
    state: Arc<MockState>,
}

#[async_trait]
impl Session for MockSession {
    async fn execute(&self, request: &ApiRequest) -> Reply {
        lock(&self.state.requests).push(RecordedRequest {
            method: request.method,
            path: request.path.clone(),
            api_key: self.api_key.clone(),
            upload_size: request.upload.as_ref().map(|upload| upload.bytes.len()),
        });
        // Clone out so the hook can't deadlock by poking the mock itself.
        let hook = lock(&self.state.hook).clone();
        if let Some(hook) = hook {
            hook(request);
        }
        if let Some(reply) = lock(&self.state.script).pop_front() {
            return reply;
        }
        lock(&self.state.fallback)
            .clone()
            .ok_or_else(|| SendError::Other(format!("no scripted reply for {} {}", request.method, request.path)))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
