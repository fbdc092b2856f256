//! HTTP transport for provider requests.
//!
//! [`Transport`] is the capability passed into provider fetchers. The reqwest
//! implementation shares one [`reqwest::Client`] so connection pooling works
//! across every window and page; logging and rate limiting wrap it as
//! decorators instead of living inside it.

use crate::config::{HTTP_CONNECT_TIMEOUT_SECS, HTTP_REQUEST_TIMEOUT_SECS};
use crate::fetcher::rate_limit::RateLimiter;
use crate::fetcher::retry_formatter::{extract_error_type, RetryErrorType};
use crate::fetcher::{FetchError, FetchResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// GET request description
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    /// Absolute URL
    pub url: String,
    /// Query parameters in order
    pub query: Vec<(String, String)>,
    /// Extra headers
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Request for `url` with no parameters
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Append a query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Value of the last query parameter named `key`
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Executes HTTP requests and decodes JSON bodies
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `request` and decode the body as JSON
    async fn get_json(&self, request: &HttpRequest) -> FetchResult<Value>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn get_json(&self, request: &HttpRequest) -> FetchResult<Value> {
        (**self).get_json(request).await
    }
}

/// Build a reqwest client with explicit timeouts so no request hangs forever
pub fn build_http_client(connect_timeout: Duration, request_timeout: Duration) -> FetchResult<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .build()
        .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {e}")))
}

/// [`Transport`] over a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Arc<Client>,
}

impl ReqwestTransport {
    /// Wrap a shared client
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    /// Client with the default connect and request timeouts
    pub fn with_default_timeouts() -> FetchResult<Self> {
        let client = build_http_client(
            Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS),
            Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS),
        )?;
        Ok(Self::new(Arc::new(client)))
    }

    /// Shared client handle
    pub fn client(&self) -> Arc<Client> {
        self.client.clone()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get_json(&self, request: &HttpRequest) -> FetchResult<Value> {
        let mut builder = self.client.get(&request.url).query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();
        crate::metrics::record_http_response(status.as_u16());

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error(status, body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::Parse(format!("failed to deserialize response: {e}")))
    }
}

/// Map a non-success status to a [`FetchError`]
pub fn status_error(status: StatusCode, body: String) -> FetchError {
    match extract_error_type(Some(status), None) {
        RetryErrorType::RateLimit => FetchError::RateLimited,
        _ => FetchError::Http {
            status: status.as_u16(),
            message: body,
        },
    }
}

/// Map a reqwest send failure to a [`FetchError`]
pub fn classify_reqwest_error(err: reqwest::Error) -> FetchError {
    if let Some(status) = err.status() {
        return status_error(status, err.to_string());
    }

    match extract_error_type(None, Some(&err)) {
        RetryErrorType::NetworkTimeout => FetchError::Timeout(err.to_string()),
        RetryErrorType::InvalidResponse => FetchError::Parse(err.to_string()),
        _ => FetchError::Network(err.to_string()),
    }
}

/// Logs every request with its duration and outcome
#[derive(Debug, Clone)]
pub struct LoggingTransport<T> {
    inner: T,
}

impl<T: Transport> LoggingTransport<T> {
    /// Wrap `inner`
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: Transport> Transport for LoggingTransport<T> {
    async fn get_json(&self, request: &HttpRequest) -> FetchResult<Value> {
        let started = Instant::now();
        debug!(
            url = %request.url,
            params = request.query.len(),
            "Making GET request"
        );

        let result = self.inner.get_json(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(url = %request.url, elapsed_ms, "Request succeeded"),
            Err(e) => warn!(url = %request.url, elapsed_ms, error = %e, "Request failed"),
        }
        result
    }
}

/// Acquires rate-limit weight before delegating each request
#[derive(Debug, Clone)]
pub struct RateLimitedTransport<T> {
    inner: T,
    limiter: Arc<RateLimiter>,
    weight: usize,
}

impl<T: Transport> RateLimitedTransport<T> {
    /// Spend one unit of `limiter` per request
    pub fn new(inner: T, limiter: Arc<RateLimiter>) -> Self {
        Self {
            inner,
            limiter,
            weight: 1,
        }
    }

    /// Spend `weight` units per request
    pub fn with_weight(mut self, weight: usize) -> Self {
        self.weight = weight.max(1);
        self
    }
}

#[async_trait]
impl<T: Transport> Transport for RateLimitedTransport<T> {
    async fn get_json(&self, request: &HttpRequest) -> FetchResult<Value> {
        self.limiter
            .acquire(self.weight)
            .await
            .map_err(|e| FetchError::Network(format!("Rate limiter error: {e}")))?;
        self.inner.get_json(request).await
    }
}
