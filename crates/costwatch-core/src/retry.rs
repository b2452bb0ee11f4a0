//! Bounded retries with exponential backoff for source calls
//!
//! Retries are confined to a single cycle: once the attempts are exhausted
//! the last error is returned and the caller records the failure.

use crate::error::SourceError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration for calls against an external source
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts per call, including the first (at least 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Upper bound for the delay between attempts
    pub max_backoff: Duration,
    /// Deadline for each individual attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that tries once, with the given deadline
    pub fn single_attempt(attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            attempt_timeout,
        }
    }

    /// Backoff to wait after the given failed attempt (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        std::cmp::min(self.initial_backoff.saturating_mul(factor), self.max_backoff)
    }

    /// Run `call` until it succeeds or the attempts are exhausted.
    /// A timed-out attempt counts as a failed attempt.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match tokio::time::timeout(self.attempt_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout(self.attempt_timeout)),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Source call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < max_attempts => {
                    let backoff = self.backoff_after(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Source call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
