use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use crate::error::{ChiselError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File {
        bytes: Vec<u8>,
        filename: String,
        mime: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(Vec<(String, FormValue)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Json(body),
        }
    }

    pub fn post_multipart(url: impl Into<String>, fields: Vec<(String, FormValue)>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Multipart(fields),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn bearer_auth(self, token: &str) -> Self {
        self.header(AUTHORIZATION.as_str(), format!("Bearer {token}"))
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub struct HttpReply {
    pub status: u16,
    pub content_type: Option<String>,
    body: Box<dyn Read + Send>,
}

impl fmt::Debug for HttpReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpReply")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

impl HttpReply {
    pub fn new(
        status: u16,
        content_type: Option<String>,
        body: impl Read + Send + 'static,
    ) -> Self {
        Self {
            status,
            content_type: content_type.map(|value| value.to_ascii_lowercase()),
            body: Box::new(body),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|value| value.starts_with("image/"))
            .unwrap_or(false)
    }

    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.body
    }

    pub fn bytes(mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.body.read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub fn json(self) -> Result<Value> {
        let bytes = self.bytes()?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

pub trait HttpTransport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpReply>;
}

/// Blocking `reqwest` transport.
pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| ChiselError::Transport {
                url: String::new(),
                source,
            })?;
        Ok(Self { http })
    }

    fn multipart_form(fields: &[(String, FormValue)]) -> reqwest::Result<MultipartForm> {
        let mut form = MultipartForm::new();
        for (name, value) in fields {
            form = match value {
                FormValue::Text(text) => form.text(name.clone(), text.clone()),
                FormValue::File {
                    bytes,
                    filename,
                    mime,
                } => form.part(
                    name.clone(),
                    MultipartPart::bytes(bytes.clone())
                        .file_name(filename.clone())
                        .mime_str(mime)?,
                ),
            };
        }
        Ok(form)
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpReply> {
        let transport_err = |source| ChiselError::Transport {
            url: request.url.clone(),
            source,
        };
        let mut builder = match request.method {
            Method::Get => self.http.get(&request.url),
            Method::Post => self.http.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(payload) => builder.json(payload),
            RequestBody::Multipart(fields) => {
                builder.multipart(Self::multipart_form(fields).map_err(transport_err)?)
            }
        };
        let response = builder.send().map_err(transport_err)?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Ok(HttpReply::new(
            response.status().as_u16(),
            content_type,
            response,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub backoff: Duration,
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(100),
            retry_statuses: vec![404, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Delay after the given failed attempt (1-based): backoff, 2x, 4x, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor)
    }
}

#[derive(Clone)]
pub struct RetryingClient {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Sends `request`, retrying on the policy's statuses and on transient
    /// transport failures. The last reply is returned as-is once attempts run
    /// out, so callers still see the final status.
    pub fn send(&self, request: &HttpRequest) -> Result<HttpReply> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.send(request) {
                Ok(reply) => {
                    if attempt >= max_attempts || !self.policy.should_retry_status(reply.status) {
                        return Ok(reply);
                    }
                    tracing::warn!(
                        url = %request.url,
                        status = reply.status,
                        "retry {}/{} after retryable status",
                        attempt,
                        max_attempts - 1
                    );
                }
                Err(err) => {
                    if attempt >= max_attempts || !err.is_retryable() {
                        return Err(err);
                    }
                    tracing::warn!(
                        url = %request.url,
                        error = %err,
                        "retry {}/{} after transport failure",
                        attempt,
                        max_attempts - 1
                    );
                }
            }
            thread::sleep(self.policy.delay_for(attempt));
        }
    }
}
