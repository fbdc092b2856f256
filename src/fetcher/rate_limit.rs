//! Weight-based request rate limiting.
//!
//! Permits are held for the full window after acquisition, so at most
//! `capacity` weight units are spent in any rolling window.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::debug;

/// Shared limiter; clones draw from the same budget
#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    window: Duration,
}

impl RateLimiter {
    /// Allow `capacity` weight units per `window`
    pub fn new(capacity: usize, window: Duration) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            window,
        }
    }

    /// One request per unit of `max_requests` in `window`
    pub fn per_window(max_requests: usize, window: Duration) -> Self {
        Self::new(max_requests, window)
    }

    /// Weight units per window
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rolling window length
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Weight units currently available
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait until `weight` units are free, then spend them for one window.
    ///
    /// A weight above capacity is clamped so it can never wait forever.
    pub async fn acquire(&self, weight: usize) -> Result<(), RateLimitError> {
        let weight = weight.clamp(1, self.capacity);
        let permits = u32::try_from(weight)
            .map_err(|_| RateLimitError::AcquireError(format!("weight {weight} too large")))?;

        let permit = self
            .semaphore
            .clone()
            .acquire_many_owned(permits)
            .await
            .map_err(|e| RateLimitError::AcquireError(e.to_string()))?;

        debug!(
            weight = weight,
            available = self.semaphore.available_permits(),
            "Rate limit permits acquired"
        );

        let window = self.window;
        tokio::spawn(async move {
            sleep(window).await;
            drop(permit);
        });

        Ok(())
    }
}

/// Rate limiter errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Failed to acquire permits
    #[error("failed to acquire rate limit permits: {0}")]
    AcquireError(String),
}
