//! Timeout and retry policy for store calls
//!
//! Every call is bounded by `call_timeout`. Transient failures are retried
//! with exponential backoff: `base_delay * 2^attempt`, capped at `max_delay`.

use crate::error::StoreError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy applied to every store call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Upper bound for a single call
    pub call_timeout: Duration,
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap for the delay between attempts
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `call` until it succeeds, fails with a non-transient error, or
    /// the attempts are used up.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(result) => result,
                Err(_elapsed) => Err(StoreError::Timeout(format!(
                    "{operation} exceeded {:?}",
                    self.call_timeout
                ))),
            };

            match result {
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.delay_for(attempt);
                    warn!("{} failed (attempt {}/{}): {}, retrying in {:?}", operation, attempt + 1, attempts, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!("{} failed: {}", operation, e);
                    return Err(e);
                }
                Ok(value) => return Ok(value),
            }
        }
    }
}
