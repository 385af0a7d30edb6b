//! Bounded retry with exponential backoff and full jitter for outbound API calls.
//!
//! Only transient failures are retried. A land query that resolves to nothing
//! is a terminal answer and is returned on the first attempt.

use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{ValuationError, ValuationResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub base_delay_ms: u64,
    /// Cap on a single backoff
    pub max_delay_ms: u64,
    /// Budget across all attempts
    pub max_elapsed_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 2000,
            max_elapsed_ms: 6000,
        }
    }
}

impl RetryPolicy {
    /// Load from RETRY_MAX_ATTEMPTS, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS,
    /// RETRY_MAX_ELAPSED_MS. Invalid values keep the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |key: &str| -> Option<u64> {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n| n > 0)
        };
        Self {
            max_attempts: read("RETRY_MAX_ATTEMPTS")
                .filter(|&n| n <= 10)
                .map(|n| n as u32)
                .unwrap_or(defaults.max_attempts),
            base_delay_ms: read("RETRY_BASE_DELAY_MS").unwrap_or(defaults.base_delay_ms),
            max_delay_ms: read("RETRY_MAX_DELAY_MS").unwrap_or(defaults.max_delay_ms),
            max_elapsed_ms: read("RETRY_MAX_ELAPSED_MS").unwrap_or(defaults.max_elapsed_ms),
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn ceiling_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms)
    }

    /// Backoff before retry number `attempt`: uniform in [0, min(max, base * 2^(attempt-1)))
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let ceiling = self.ceiling_ms(attempt);
        if ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..ceiling)
        }
    }
}

/// Whether an error is worth another attempt, and how long the server asked us to wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retryable: bool,
    pub retry_after_secs: Option<u64>,
}

impl RetryDecision {
    pub fn classify(err: &ValuationError) -> Self {
        let retry_after_secs = match err {
            ValuationError::RateLimited(secs) => Some(*secs),
            _ => None,
        };
        Self {
            retryable: err.is_transient(),
            retry_after_secs,
        }
    }
}

/// Retry an async operation under `policy`.
///
/// `op_name` tags the debug/warn lines (e.g. "coingecko_prices").
pub async fn retry_async<T, Fut, F>(
    policy: &RetryPolicy,
    op_name: &str,
    mut operation: F,
) -> ValuationResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ValuationResult<T>>,
{
    let start = Instant::now();
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(op = op_name, attempt, "retry succeeded");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        let decision = RetryDecision::classify(&err);
        if !decision.retryable {
            return Err(err);
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if attempt >= policy.max_attempts || elapsed_ms >= policy.max_elapsed_ms {
            warn!(
                op = op_name,
                attempt,
                elapsed_ms,
                error = %err,
                "giving up after transient failures"
            );
            return Err(err);
        }

        let wanted = match decision.retry_after_secs {
            Some(secs) => secs.saturating_mul(1000).min(policy.max_delay_ms),
            None => policy.backoff_ms(attempt),
        };
        let backoff_ms = wanted.min(policy.max_elapsed_ms.saturating_sub(elapsed_ms));

        debug!(op = op_name, attempt, backoff_ms, error = %err, "retrying");
        if backoff_ms > 0 {
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        }
        attempt += 1;
    }
}
