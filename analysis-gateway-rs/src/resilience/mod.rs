//! Resilience patterns for backend calls
//!
//! Backend adapters never retry or time out on their own; every upstream call
//! made by the gateway goes through the `RetryExecutor` defined here.

mod retry;

pub use retry::{RetryConfig, RetryExecutor, JITTER_MAX, JITTER_MIN};
