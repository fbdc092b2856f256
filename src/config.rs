//! Fetch configuration constants and serde-backed settings

use crate::fetcher::http::build_http_client;
use crate::fetcher::{FetchResult, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum attempts per network operation, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay before the first retry in milliseconds.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Multiplier applied to the delay after each retry.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Upper bound for a single backoff delay in milliseconds.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000; // 30 seconds

/// Records requested per page by offset-paged endpoints.
pub const DEFAULT_PAGE_SIZE: u64 = 5000;

/// Concurrent page requests after page 0.
pub const DEFAULT_PAGE_WORKERS: usize = 4;

/// Safety cap on pages a single pagination may schedule.
/// A corrupt total count must not fan out into millions of requests.
pub const MAX_PAGES: u64 = 10_000;

/// HTTP connect timeout in seconds.
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// HTTP request timeout in seconds.
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Top-level fetch settings.
///
/// Every section falls back to the defaults above, so `{}` is a valid config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Retry behaviour for windows and pages
    pub retry: RetryConfig,
    /// Paginated endpoint settings
    pub pagination: PaginationConfig,
    /// HTTP client timeouts
    pub http: HttpConfig,
    /// Aggregate deadline for one range run, in seconds
    pub run_timeout_secs: Option<u64>,
}

impl FetchConfig {
    /// Parse settings from a JSON document
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    /// Aggregate deadline for one range run
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

/// Retry settings in wire-friendly units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per operation, including the first
    pub max_attempts: u32,
    /// First backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Growth factor between delays
    pub backoff_multiplier: f64,
    /// Backoff cap in milliseconds
    pub max_backoff_ms: u64,
    /// Per-attempt timeout in milliseconds
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            attempt_timeout_ms: None,
        }
    }
}

impl RetryConfig {
    /// Convert into a [`RetryPolicy`]
    pub fn policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            self.backoff_multiplier,
        )
        .with_max_delay(Duration::from_millis(self.max_backoff_ms));

        match self.attempt_timeout_ms {
            Some(ms) => policy.with_attempt_timeout(Duration::from_millis(ms)),
            None => policy,
        }
    }
}

/// Pagination settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Records per page
    pub page_size: u64,
    /// Concurrent page requests
    pub workers: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            workers: DEFAULT_PAGE_WORKERS,
        }
    }
}

/// HTTP client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: HTTP_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: HTTP_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl HttpConfig {
    /// Build a reqwest client with these timeouts
    pub fn build_client(&self) -> FetchResult<reqwest::Client> {
        build_http_client(
            Duration::from_secs(self.connect_timeout_secs),
            Duration::from_secs(self.request_timeout_secs),
        )
    }
}
