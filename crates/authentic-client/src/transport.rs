//! HTTP transport capability.
//!
//! The client never talks to the network directly; every outbound call is
//! assembled into a [`RequestEnvelope`] and handed to a [`Transport`]. The
//! default transport is [`ReqwestTransport`]. Relative URLs are turned into
//! absolute ones by an injected [`UrlResolver`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::error::{ClientError, TransportError};

/// A single outbound request. Built fresh for every send.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    /// HTTP method.
    pub method: Method,
    /// Absolute target URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// JSON body, if any.
    pub body: Option<Value>,
    /// Per-request timeout, passed through to the transport untouched.
    pub timeout: Option<Duration>,
}

impl RequestEnvelope {
    /// Create an envelope with no headers, body, or timeout.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    /// Apply caller options. Caller headers are merged into the envelope.
    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.headers.extend(options.headers);
        self.timeout = options.timeout;
        self
    }

    /// Set `Authorization: Bearer <token>`, replacing any caller-supplied value.
    ///
    /// # Errors
    ///
    /// Returns an error if the token contains characters not allowed in a header.
    pub fn with_bearer(mut self, token: &str) -> Result<Self, TransportError> {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }
}

/// Per-call options supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers, merged with the injected `Authorization` header.
    pub headers: HeaderMap,
    /// Request timeout, forwarded to the transport.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Options carrying a single extra header.
    #[must_use]
    pub fn with_header(mut self, name: reqwest::header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Options carrying a timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A received response with its body parsed as JSON.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Parsed body. `Value::Null` for an empty body.
    pub body: Value,
}

impl Response {
    /// Returns `true` for 1xx, 2xx and 3xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// Capability for sending requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and parse its JSON response.
    ///
    /// Non-success statuses are not errors at this layer.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure or an undecodable success body.
    async fn send(&self, request: RequestEnvelope) -> Result<Response, TransportError>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with an optional default timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(5));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Create a transport with a custom reqwest client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: RequestEnvelope) -> Result<Response, TransportError> {
        tracing::debug!(method = %request.method, url = %request.url, "Sending request");

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let bytes = response.bytes().await?;

        Ok(Response {
            status,
            headers,
            body: decode_body(status, &bytes)?,
        })
    }
}

/// Parse a response body. Error responses keep non-JSON text as a string.
fn decode_body(status: u16, bytes: &[u8]) -> Result<Value, TransportError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    match serde_json::from_slice(bytes) {
        Ok(body) => Ok(body),
        Err(_) if status >= 400 => Ok(Value::String(
            String::from_utf8_lossy(bytes).into_owned(),
        )),
        Err(e) => Err(TransportError::Decode(e.to_string())),
    }
}

/// Turns caller-supplied URLs into absolute ones.
pub trait UrlResolver: Send + Sync {
    /// Resolve `url` to an absolute URL.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidUrl` if the URL cannot be resolved.
    fn resolve(&self, url: &str) -> Result<Url, ClientError>;
}

/// Accepts absolute URLs only.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbsoluteUrls;

impl UrlResolver for AbsoluteUrls {
    fn resolve(&self, url: &str) -> Result<Url, ClientError> {
        Url::parse(url).map_err(|e| ClientError::InvalidUrl(format!("{url}: {e}")))
    }
}

/// Resolves `/path` URLs against a fixed origin; absolute URLs pass through.
#[derive(Debug, Clone)]
pub struct OriginResolver {
    origin: Url,
}

impl OriginResolver {
    /// Create a resolver for the given origin.
    #[must_use]
    pub const fn new(origin: Url) -> Self {
        Self { origin }
    }
}

impl UrlResolver for OriginResolver {
    fn resolve(&self, url: &str) -> Result<Url, ClientError> {
        if url.starts_with('/') {
            self.origin
                .join(url)
                .map_err(|e| ClientError::InvalidUrl(format!("{url}: {e}")))
        } else {
            AbsoluteUrls.resolve(url)
        }
    }
}
