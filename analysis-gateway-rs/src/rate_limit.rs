//! Per-client fixed-window rate limiting
//!
//! Buckets are keyed by `"{operation}:{client}"`; each holds a count and the
//! instant its window resets. Elapsed buckets are removed by `collect_garbage`,
//! normally from a background task started with `spawn_gc`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::{GatewayError, Result};

/// Operations limited independently of each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    Analyze,
    FollowUp,
    Speech,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Analyze => "analyze",
            OperationClass::FollowUp => "follow_up",
            OperationClass::Speech => "speech",
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct RateBucket {
    count: u32,
    reset_at: Instant,
}

/// Outcome of counting a request against a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Rejected; the window resets after the given delay
    Limited(Duration),
}

/// Fixed-window limiter shared by all requests of one gateway
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, RateBucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn buckets(&self) -> MutexGuard<'_, HashMap<String, RateBucket>> {
        self.buckets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count one request against `client_key`, allowing at most `limit` per `window`
    ///
    /// A limit of 0 always allows.
    pub fn allow(&self, client_key: &str, limit: u32, window: Duration) -> bool {
        matches!(self.decide(client_key, limit, window), Decision::Allowed)
    }

    fn decide(&self, bucket_key: &str, limit: u32, window: Duration) -> Decision {
        if limit == 0 {
            return Decision::Allowed;
        }

        let now = Instant::now();
        let mut buckets = self.buckets();
        let bucket = buckets
            .entry(bucket_key.to_string())
            .or_insert_with(|| RateBucket {
                count: 0,
                reset_at: now + window,
            });

        if now >= bucket.reset_at {
            bucket.count = 0;
            bucket.reset_at = now + window;
        }

        if bucket.count >= limit {
            return Decision::Limited(bucket.reset_at.saturating_duration_since(now));
        }

        bucket.count += 1;
        Decision::Allowed
    }

    /// Configured limit for an operation class
    pub fn limit_for(&self, class: OperationClass) -> u32 {
        match class {
            OperationClass::Analyze => self.config.analyze,
            OperationClass::FollowUp => self.config.follow_up,
            OperationClass::Speech => self.config.speech,
        }
    }

    /// Count a request for `client_key` under the configured limits
    pub fn check(&self, client_key: &str, class: OperationClass) -> Result<()> {
        let limit = self.limit_for(class);
        let bucket_key = format!("{}:{}", class, client_key);

        match self.decide(&bucket_key, limit, self.config.window) {
            Decision::Allowed => Ok(()),
            Decision::Limited(retry_after) => {
                warn!(
                    client = %client_key,
                    operation = %class,
                    limit = limit,
                    retry_after_secs = retry_after.as_secs(),
                    "Rate limit exceeded"
                );
                Err(GatewayError::rate_limited(
                    format!(
                        "{} requests per {}s allowed for {}",
                        limit,
                        self.config.window.as_secs(),
                        class
                    ),
                    retry_after,
                ))
            }
        }
    }

    /// Remove buckets whose window has elapsed, returning how many were removed
    pub fn collect_garbage(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets();
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.reset_at > now);
        before - buckets.len()
    }

    /// Number of live buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets().len()
    }

    /// Run `collect_garbage` every `every` until the limiter is dropped
    pub fn spawn_gc(self: &Arc<Self>, every: Duration) -> Option<JoinHandle<()>> {
        if every.is_zero() {
            return None;
        }
        let limiter: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let removed = limiter.collect_garbage();
                if removed > 0 {
                    debug!(removed = removed, "Collected expired rate limit buckets");
                }
            }
        }))
    }
}
