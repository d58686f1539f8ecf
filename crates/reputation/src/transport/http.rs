//! HTTPS transport backed by `reqwest`.

use super::{ApiRequest, ApiResponse, Connector, Method, SendError, Session, SessionHandle};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use std::sync::Arc;
use std::time::Duration;

const API_KEY_HEADER: &str = "x-apikey";

/// Builds one pooled `reqwest::Client` per credential.
///
/// The API key is installed as a default (sensitive) header, so a session is
/// tied to the key it was built with and has to be rebuilt when it changes.
#[derive(Clone, Debug)]
pub struct HttpConnector {
    base_url: String,
    timeout: Duration,
    user_agent: String,
}

impl HttpConnector {
    pub fn new(base_url: impl Into<String>, timeout: Duration, user_agent: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            user_agent: user_agent.into(),
        }
    }
}

impl Connector for HttpConnector {
    fn connect(&self, api_key: &str) -> Result<SessionHandle> {
        let mut key = HeaderValue::from_str(api_key).or_raise(|| ErrorKind::InvalidCredential)?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key);
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .build()
            .or_raise(|| ErrorKind::Request("could not initialise HTTP client".to_string()))?;
        Ok(Arc::new(HttpSession {
            client,
            base_url: self.base_url.clone(),
        }))
    }
}

struct HttpSession {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSession {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Session for HttpSession {
    async fn execute(&self, request: &ApiRequest) -> std::result::Result<ApiResponse, SendError> {
        let url = self.url(&request.path);
        let builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        let builder = match &request.upload {
            Some(upload) => {
                // Bytes are cloned per attempt; retries need the body again.
                let part = Part::bytes(upload.bytes.clone()).file_name(upload.file_name.clone());
                builder.multipart(Form::new().part("file", part))
            },
            None => builder,
        };
        let response = builder.send().await.map_err(send_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|err| SendError::Body(err.to_string()))?;
        tracing::trace!(method = %request.method, path = %request.path, status, bytes = body.len(), "Received response");
        Ok(ApiResponse::new(status, body.to_vec()))
    }
}

fn send_error(err: reqwest::Error) -> SendError {
    if err.is_timeout() {
        SendError::Timeout
    } else if err.is_connect() {
        SendError::Connect
    } else {
        SendError::Other(err.to_string())
    }
}
