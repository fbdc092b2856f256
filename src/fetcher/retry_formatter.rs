//! Retry message formatting and error classification.
//!
//! [`RetryErrorType`] is the user-facing taxonomy shared by the HTTP transport
//! (status and reqwest error classification) and the retry loop (log
//! messages). [`RetryContext`] renders consistent retry, recovery and final
//! failure messages.

use crate::fetcher::FetchError;
use crate::range::Window;
use reqwest::{Error as ReqwestError, StatusCode};
use std::time::Duration;

/// Classification of fetch errors for user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Network timeout or an attempt exceeding its time budget
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// HTTP 5xx server error
    ServerError(u16),
    /// HTTP 400 invalid request
    InvalidRequest,
    /// Authentication failures (401/403)
    AuthFailed(u16),
    /// Other client errors (4xx, except 408 and 429)
    ClientError(u16),
    /// Response body could not be used
    InvalidResponse,
    /// Provider returned no records
    NoData,
    /// Operation was cancelled
    Cancelled,
    /// Generic fallback when no better classification fits
    NetworkGeneric,
}

impl RetryErrorType {
    /// Short description used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::InvalidRequest => "invalid request",
            Self::AuthFailed(401) => "authentication failed (401)",
            Self::AuthFailed(403) => "authentication failed (403)",
            Self::AuthFailed(_) => "authentication failed",
            Self::ClientError(404) => "resource not found",
            Self::ClientError(_) => "client error",
            Self::InvalidResponse => "invalid response",
            Self::NoData => "no data returned",
            Self::Cancelled => "cancelled",
            Self::NetworkGeneric => "network error",
        }
    }

    /// Remediation hint printed after a final failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check network connectivity or raise the request timeout",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::RateLimit => "Reduce the request rate or lengthen the backoff",
            Self::ServerError(_) => "The provider may be experiencing issues, try again later",
            Self::InvalidRequest => "Check the date range and query parameters",
            Self::AuthFailed(_) => "Verify the API key and its permissions",
            Self::ClientError(_) => "Review request parameters against the provider's API",
            Self::InvalidResponse => "The provider's response format may have changed",
            Self::NoData => "Check that the provider publishes data for this range",
            Self::Cancelled => "The query was cancelled before completion",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether the error type is typically retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkTimeout
                | Self::NetworkOffline
                | Self::RateLimit
                | Self::ServerError(_)
                | Self::NetworkGeneric
        )
    }
}

impl From<&FetchError> for RetryErrorType {
    fn from(err: &FetchError) -> Self {
        match err {
            FetchError::Http { status, .. } => classify_status(*status),
            FetchError::RateLimited => Self::RateLimit,
            FetchError::Network(_) => Self::NetworkGeneric,
            FetchError::Timeout(_) => Self::NetworkTimeout,
            FetchError::Parse(_) | FetchError::Api(_) | FetchError::Schema(_) => {
                Self::InvalidResponse
            }
            FetchError::NoData(_) => Self::NoData,
            FetchError::Unsupported(_) => Self::InvalidRequest,
            FetchError::Exhausted { source, .. } => Self::from(source.as_ref()),
            FetchError::Cancelled => Self::Cancelled,
        }
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt number the message refers to (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered retry
    pub error_type: RetryErrorType,
    /// Backoff duration until next attempt
    pub backoff_duration: Duration,
    /// Operation label (e.g. "pjm:da_hrl_lmps" or "page")
    pub operation: String,
    /// Window being fetched, if any
    pub window: Option<Window>,
    /// Original error message for details
    pub error_message: String,
}

impl RetryContext {
    /// Context for an error raised by `operation`.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error: &FetchError,
        backoff_duration: Duration,
        operation: impl Into<String>,
        window: Option<Window>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type: RetryErrorType::from(error),
            backoff_duration,
            operation: operation.into(),
            window,
            error_message: error.to_string(),
        }
    }

    /// Context for an attempt that succeeded after earlier failures.
    pub fn recovered(
        attempt: u32,
        max_attempts: u32,
        operation: impl Into<String>,
        window: Option<Window>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type: RetryErrorType::NetworkGeneric,
            backoff_duration: Duration::ZERO,
            operation: operation.into(),
            window,
            error_message: String::new(),
        }
    }

    /// Standardized retry message with attempt counters and context.
    pub fn format_retry(&self) -> String {
        let mut message = format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64()
        );

        append_operation_and_window(&mut message, &self.operation, self.window);
        message
    }

    /// Message for an attempt that succeeded after earlier failures.
    pub fn format_success(&self) -> String {
        let mut message = format!(
            "Retry attempt {}/{} succeeded - resuming",
            self.attempt, self.max_attempts
        );
        append_operation_and_window(&mut message, &self.operation, self.window);
        message
    }

    /// Final failure summary with actionable suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "[FAILED] Fetch failed after {} attempts",
            self.attempt
        ));
        lines.push(format!("  Last error: {}", self.error_message));

        let operation = if self.operation.is_empty() {
            "unknown"
        } else {
            &self.operation
        };
        lines.push(format!("  Operation: {operation}"));

        let window = self
            .window
            .map(format_window)
            .unwrap_or_else(|| "none".to_string());
        lines.push(format!("  Window: {window}"));
        lines.push("  Suggestions:".to_string());

        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }

        lines.join("\n")
    }

    /// Suggestions tailored to the current retry context.
    pub fn format_suggestions(&self) -> Vec<String> {
        let mut suggestions = vec![self.error_type.suggestion().to_string()];
        if self.error_type.is_retryable() {
            suggestions.push(format!(
                "Try increasing max_attempts (current: {})",
                self.max_attempts
            ));
        }
        suggestions
    }
}

/// Classify an HTTP status or reqwest error.
pub fn extract_error_type(
    status: Option<StatusCode>,
    err: Option<&ReqwestError>,
) -> RetryErrorType {
    if let Some(status) = status {
        return classify_status(status.as_u16());
    }

    if let Some(err) = err {
        if err.is_timeout() {
            return RetryErrorType::NetworkTimeout;
        }

        if err.is_connect() {
            return RetryErrorType::NetworkOffline;
        }

        if err.is_decode() {
            return RetryErrorType::InvalidResponse;
        }
    }

    RetryErrorType::NetworkGeneric
}

fn classify_status(status: u16) -> RetryErrorType {
    match status {
        400 => RetryErrorType::InvalidRequest,
        401 | 403 => RetryErrorType::AuthFailed(status),
        408 => RetryErrorType::NetworkTimeout,
        429 => RetryErrorType::RateLimit,
        500..=599 => RetryErrorType::ServerError(status),
        _ => RetryErrorType::ClientError(status),
    }
}

fn append_operation_and_window(buffer: &mut String, operation: &str, window: Option<Window>) {
    if !operation.is_empty() {
        buffer.push_str(&format!(" ({operation})"));
    }

    if let Some(window) = window {
        buffer.push(' ');
        buffer.push_str(&format_window(window));
    }
}

fn format_window(window: Window) -> String {
    format!(
        "{} to {}",
        window.start.format("%Y-%m-%d %H:%M"),
        window.end.format("%Y-%m-%d %H:%M")
    )
}
