//! # Analysis Gateway
//!
//! The request gateway in front of the incident analyzer's generation
//! backends.
//!
//! This crate provides:
//!
//! - Request normalization and validation for logs, screenshots, follow-up
//!   conversations and speech text
//! - Deterministic SHA-256 fingerprints of normalized analyze requests
//! - A tolerant parser that repairs model output into a typed `Report`
//! - Interchangeable backends (offline demo, hosted multimodal, local
//!   OpenAI-compatible) behind the `Backend` trait
//! - Retries with exponential backoff, jitter and per-call timeouts
//! - A TTL + LRU analyze cache with in-flight coalescing
//! - Per-client fixed-window rate limiting
//!
//! ## Architecture
//!
//! `AnalysisGateway` composes the pieces. An analyze request flows through
//! rate limiting, normalization, fingerprinting, the cache, the coalescer
//! and the retry engine before reaching the backend; the parsed report is
//! cached and handed to every waiter.

pub mod backends;
pub mod cache;
pub mod cache_key;
pub mod coalescer;
pub mod config;
pub mod error;
pub mod gateway;
pub mod normalize;
pub mod rate_limit;
pub mod repair;
pub mod report;
pub mod request;
pub mod resilience;

mod util;

#[cfg(test)]
mod tests;

pub use backends::{Backend, DemoBackend, HostedBackend, LocalBackend, SpeechOutput};
pub use cache::TtlLruCache;
pub use cache_key::{build_cache_key, CacheKey};
pub use coalescer::{FlightRole, SingleFlight};
pub use config::{
    BackendKind, ConfigProvider, ConfigProviderExt, EnvConfigProvider, GatewayConfig, MemoryConfigProvider,
    ServiceConfig,
};
pub use error::{ErrorKind, GatewayError, Result};
pub use gateway::{AnalysisGateway, AnalyzeOutcome, GatewayStats, MaintenanceHandle, ResultSource};
pub use rate_limit::{OperationClass, RateLimiter};
pub use report::Report;
pub use request::{RawAnalyzeRequest, RawFollowUpRequest, RawSpeechRequest};
pub use resilience::{RetryConfig, RetryExecutor};
