//! Retry with exponential backoff and per-attempt timeouts
//!
//! Every attempt is bounded by `call_timeout`; only transient failures are
//! retried, and the delay before attempt `n >= 2` is
//! `base_delay * 2^(n-1) * U(0.7, 1.3)`, clamped to `max_delay`.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};

/// Lower bound of the multiplicative jitter factor
pub const JITTER_MIN: f64 = 0.7;
/// Upper bound of the multiplicative jitter factor
pub const JITTER_MAX: f64 = 1.3;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,

    /// Base backoff duration
    pub base_delay: Duration,

    /// Maximum backoff duration
    pub max_delay: Duration,

    /// Deadline for a single attempt
    pub call_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl fmt::Display for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RetryConfig {{ max_attempts: {}, base_delay: {:?}, max_delay: {:?}, call_timeout: {:?} }}",
            self.max_attempts, self.base_delay, self.max_delay, self.call_timeout
        )
    }
}

/// Executor for retry operations with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor with the specified configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute a fallible operation with timeouts and retries
    ///
    /// The last error is returned unchanged once attempts are exhausted or a
    /// non-retryable error occurs.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let start_time = Instant::now();
        let mut attempt: u32 = 1;

        loop {
            let result = match timeout(self.config.call_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::timeout(format!(
                    "{} timed out after {}ms",
                    operation_name,
                    self.config.call_timeout.as_millis()
                ))),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            operation = %operation_name,
                            attempt = attempt,
                            duration_ms = %start_time.elapsed().as_millis(),
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_before(attempt + 1, error.retry_after());
                    warn!(
                        operation = %operation_name,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = %delay.as_millis(),
                        error = %error,
                        "Retryable failure, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    if error.is_retryable() {
                        warn!(
                            operation = %operation_name,
                            attempts = attempt,
                            duration_ms = %start_time.elapsed().as_millis(),
                            error = %error,
                            "Operation failed after retries"
                        );
                    } else {
                        debug!(
                            operation = %operation_name,
                            attempt = attempt,
                            kind = %error.kind(),
                            "Non-retryable failure"
                        );
                    }
                    return Err(error);
                }
            }
        }
    }

    /// Backoff to wait before `attempt` (2 for the first retry)
    ///
    /// A `retry_after` hint from the upstream raises the delay; the result is
    /// always clamped to `max_delay`.
    pub fn delay_before(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let jitter = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
        let delay = self.scaled_delay(attempt, jitter);
        match retry_after {
            Some(hint) => delay.max(hint).min(self.config.max_delay),
            None => delay,
        }
    }

    /// Deterministic part of the backoff for a given jitter factor
    pub fn scaled_delay(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let base_ms = self.config.base_delay.as_secs_f64() * 1000.0;
        let max_ms = self.config.max_delay.as_secs_f64() * 1000.0;
        let delay_ms = (base_ms * 2f64.powi(exponent) * jitter).clamp(0.0, max_ms);
        Duration::from_secs_f64(delay_ms / 1000.0)
    }

    /// Get the current retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
