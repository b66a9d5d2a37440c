//! Gateway facade
//!
//! `AnalysisGateway` composes the pipeline for every operation:
//! rate limit, normalize, then (for analyze) fingerprint, cache lookup and
//! in-flight coalescing before the retry engine calls the backend. All state
//! is owned by the gateway instance.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backends::{self, Backend, SpeechOutput};
use crate::cache::TtlLruCache;
use crate::cache_key::{build_cache_key, CacheKey};
use crate::coalescer::{FlightRole, SingleFlight};
use crate::config::GatewayConfig;
use crate::error::Result;
use crate::normalize::{normalize_analyze, normalize_follow_up, normalize_speech_text};
use crate::rate_limit::{OperationClass, RateLimiter};
use crate::report::Report;
use crate::request::{RawAnalyzeRequest, RawFollowUpRequest};
use crate::resilience::RetryExecutor;

type ReportCache = TtlLruCache<CacheKey, Arc<Report>>;

/// Where an analyze result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// This call ran the backend
    Fresh,
    /// Served from the analyze cache
    Cached,
    /// Shared the result of an identical request already in flight
    Coalesced,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSource::Fresh => "fresh",
            ResultSource::Cached => "cached",
            ResultSource::Coalesced => "coalesced",
        }
    }
}

/// Result of an analyze call
#[derive(Debug, Clone)]
pub struct AnalyzeOutcome {
    pub report: Arc<Report>,
    pub source: ResultSource,
    pub cache_key: CacheKey,
    pub log_truncated: bool,
    pub dropped_images: usize,
}

/// Point-in-time view of gateway state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub backend: String,
    pub cache_enabled: bool,
    pub cache_entries: usize,
    pub in_flight: usize,
    pub rate_limit_buckets: usize,
}

/// Background maintenance tasks; aborted when dropped
#[derive(Debug, Default)]
pub struct MaintenanceHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Number of running tasks
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Entry point for analyze, follow-up and speech requests
pub struct AnalysisGateway {
    config: GatewayConfig,
    backend: Arc<dyn Backend>,
    cache: Arc<ReportCache>,
    in_flight: SingleFlight<CacheKey, Arc<Report>>,
    limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
}

impl AnalysisGateway {
    /// Build a gateway around an existing backend
    pub fn new(config: GatewayConfig, backend: Arc<dyn Backend>) -> Self {
        let cache = Arc::new(TtlLruCache::new(config.cache.ttl, config.cache.max_entries));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let retry = RetryExecutor::new(config.retry.clone());

        info!(
            backend = %backend.identity(),
            cache_enabled = cache.is_enabled(),
            retry = %config.retry,
            "Analysis gateway initialized"
        );

        Self {
            config,
            backend,
            cache,
            in_flight: SingleFlight::new(),
            limiter,
            retry,
        }
    }

    /// Validate configuration and build the configured backend
    pub fn from_config(config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let backend = backends::from_config(&config)?;
        Ok(Self::new(config, backend))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn backend_identity(&self) -> &str {
        self.backend.identity()
    }

    /// Analyze logs and screenshots into a report
    pub async fn analyze(&self, client_key: &str, raw: RawAnalyzeRequest) -> Result<AnalyzeOutcome> {
        self.limiter.check(client_key, OperationClass::Analyze)?;

        let request = normalize_analyze(raw, &self.config.limits, self.backend.identity())?;
        let cache_key = build_cache_key(&request);
        let log_truncated = request.log_truncated();
        let dropped_images = request.dropped_images();

        let outcome = |report: Arc<Report>, source: ResultSource| AnalyzeOutcome {
            report,
            source,
            cache_key: cache_key.clone(),
            log_truncated,
            dropped_images,
        };

        if let Some(report) = self.cache.get(&cache_key) {
            debug!(key = %cache_key.short(), "Analyze cache hit");
            return Ok(outcome(report, ResultSource::Cached));
        }

        let work = {
            let backend = Arc::clone(&self.backend);
            let cache = Arc::clone(&self.cache);
            let retry = self.retry.clone();
            let key = cache_key.clone();
            move || async move {
                let report = retry.execute("analyze", || backend.analyze(&request)).await?;
                let report = Arc::new(report);
                cache.set(key, Arc::clone(&report));
                Ok(report)
            }
        };

        let (result, role) = self
            .in_flight
            .run(cache_key.clone(), || self.cache.get(&cache_key), work)
            .await;
        let report = result?;

        let source = match role {
            FlightRole::Leader => ResultSource::Fresh,
            FlightRole::Joined => ResultSource::Coalesced,
            FlightRole::Cached => ResultSource::Cached,
        };
        info!(
            client = %client_key,
            key = %cache_key.short(),
            source = source.as_str(),
            severity = report.severity.as_str(),
            "Analyze completed"
        );

        Ok(outcome(report, source))
    }

    /// Answer a question about a report; never cached
    pub async fn follow_up(&self, client_key: &str, raw: RawFollowUpRequest) -> Result<String> {
        self.limiter.check(client_key, OperationClass::FollowUp)?;

        let request = normalize_follow_up(raw, &self.config.limits)?;
        let answer = self
            .retry
            .execute("follow_up", || self.backend.follow_up(&request))
            .await?;

        debug!(client = %client_key, chars = answer.chars().count(), "Follow-up answered");
        Ok(answer)
    }

    /// Synthesize speech for a briefing text; never cached
    pub async fn speak(&self, client_key: &str, text: Option<&str>) -> Result<SpeechOutput> {
        self.limiter.check(client_key, OperationClass::Speech)?;

        let text = normalize_speech_text(text, &self.config.limits)?;
        let output = self.retry.execute("speech", || self.backend.speak(&text)).await?;

        if let SpeechOutput::Audio { mime_type, bytes } = &output {
            debug!(client = %client_key, mime_type = %mime_type, bytes = bytes.len(), "Speech synthesized");
        }
        Ok(output)
    }

    /// Start the cache sweeper and the rate limiter garbage collector
    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        let tasks: Vec<JoinHandle<()>> = [
            self.cache.spawn_sweeper(self.config.cache.sweep_interval),
            self.limiter.spawn_gc(self.config.rate_limit.gc_interval),
        ]
        .into_iter()
        .flatten()
        .collect();

        debug!(tasks = tasks.len(), "Maintenance tasks started");
        MaintenanceHandle { tasks }
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            backend: self.backend.identity().to_string(),
            cache_enabled: self.cache.is_enabled(),
            cache_entries: self.cache.len(),
            in_flight: self.in_flight.len(),
            rate_limit_buckets: self.limiter.bucket_count(),
        }
    }
}
