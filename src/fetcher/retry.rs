//! Bounded exponential-backoff retry around one network operation

use crate::cancel::Cancellation;
use crate::config::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_BACKOFF_MS,
};
use crate::fetcher::retry_formatter::RetryContext;
use crate::fetcher::{FetchError, FetchResult};
use crate::range::Window;
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Retry parameters for one call site
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first; at least 1
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Growth factor applied per retry
    pub backoff_multiplier: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Time budget for each attempt
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_delay: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Policy with the default delay cap and no attempt timeout
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff_multiplier,
            ..Self::default()
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Cap every delay at `max_delay`
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Bound each attempt by `timeout`; expiry counts as a transient failure
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Delay before retry `retry` (0 for the first retry).
    ///
    /// `initial_delay * backoff_multiplier^retry`, capped at `max_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }
}

/// Suspends the retry loop between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSleeper;

#[async_trait]
impl Sleeper for NoopSleeper {
    async fn sleep(&self, _duration: Duration) {}
}

/// Records requested delays without sleeping
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|delays| delays.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}

/// Runs an operation under a [`RetryPolicy`].
///
/// Transient errors are retried with exponential backoff; any other error is
/// returned unchanged on first sight. When every attempt fails transiently
/// the last error is wrapped in [`FetchError::Exhausted`].
#[derive(Clone)]
pub struct RetryingFetch {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    cancellation: Option<Cancellation>,
    label: String,
    window: Option<Window>,
}

impl Default for RetryingFetch {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryingFetch {
    /// Retry under `policy`, sleeping on the tokio timer
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: Arc::new(TokioSleeper),
            cancellation: None,
            label: String::new(),
            window: None,
        }
    }

    /// Replace the sleeper (tests inject [`RecordingSleeper`] or [`NoopSleeper`])
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Abort between attempts and during backoff when `cancellation` fires
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// Operation label used in logs and metrics
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Copy of this retrier that reports `window` in its messages
    pub fn for_window(&self, window: Window) -> Self {
        let mut scoped = self.clone();
        scoped.window = Some(window);
        scoped
    }

    /// Active policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Operation label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run `operation` until it succeeds, fails non-transiently, or attempts run out
    pub async fn call<T, F, Fut>(&self, mut operation: F) -> FetchResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FetchResult<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if self.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let outcome = match self.policy.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout(format!(
                        "attempt exceeded {}ms",
                        limit.as_millis()
                    ))),
                },
                None => operation().await,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        let ctx = RetryContext::recovered(
                            attempt,
                            max_attempts,
                            &self.label,
                            self.window,
                        );
                        info!("{}", ctx.format_success());
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                debug!(
                    operation = %self.label,
                    attempt = attempt,
                    error = %err,
                    "Non-transient error, not retrying"
                );
                return Err(err);
            }

            if attempt >= max_attempts {
                let ctx = RetryContext::new(
                    attempt,
                    max_attempts,
                    &err,
                    Duration::ZERO,
                    &self.label,
                    self.window,
                );
                error!("{}", ctx.format_failure());
                crate::metrics::record_exhausted(&self.label);
                return Err(FetchError::Exhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.policy.delay_for_retry(attempt - 1);
            let ctx = RetryContext::new(
                attempt + 1,
                max_attempts,
                &err,
                delay,
                &self.label,
                self.window,
            );
            warn!(
                operation = %self.label,
                attempt = attempt,
                max_attempts = max_attempts,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "{}",
                ctx.format_retry()
            );
            crate::metrics::record_retry(&self.label, delay);

            self.pause(delay).await?;
            attempt += 1;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(Cancellation::is_cancelled)
    }

    async fn pause(&self, delay: Duration) -> FetchResult<()> {
        match &self.cancellation {
            Some(cancellation) => {
                tokio::select! {
                    _ = self.sleeper.sleep(delay) => Ok(()),
                    _ = cancellation.cancelled() => Err(FetchError::Cancelled),
                }
            }
            None => {
                self.sleeper.sleep(delay).await;
                Ok(())
            }
        }
    }
}
