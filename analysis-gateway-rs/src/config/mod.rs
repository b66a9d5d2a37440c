//! Configuration management for the gateway
//!
//! This module provides utilities for loading and validating gateway
//! configuration, with support for environment variables. Every knob has a
//! default; values that are present but unparsable are rejected rather than
//! silently replaced.

use std::collections::HashMap;
use std::env;
use std::fmt::Debug;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::resilience::RetryConfig;

/// Environment prefix used by `GatewayConfig::from_env`
pub const ENV_PREFIX: &str = "INCIDENT";

/// Base trait for configuration providers
pub trait ConfigProvider: Send + Sync {
    /// Get a string configuration value
    fn get_string(&self, key: &str) -> Result<String>;
}

/// Extension methods for configuration providers
pub trait ConfigProviderExt: ConfigProvider {
    /// Get a typed configuration value by parsing from string
    fn get<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        <T as FromStr>::Err: std::fmt::Display,
    {
        let value = self.get_string(key)?;
        value
            .trim()
            .parse::<T>()
            .map_err(|e| GatewayError::configuration(format!("Invalid value for key {}: {}", key, e)))
    }

    /// Get a typed value, falling back to `default` only when the key is absent
    fn get_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        <T as FromStr>::Err: std::fmt::Display,
    {
        match self.get_string(key) {
            Ok(_) => self.get(key),
            Err(_) => Ok(default),
        }
    }

    /// Get a string configuration value with a default
    fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|_| default.to_string())
    }

    /// Get a non-empty optional string
    fn get_optional(&self, key: &str) -> Option<String> {
        self.get_string(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Get a comma-separated list, parsing each non-empty item
    fn get_list_or<T>(&self, key: &str, default: Vec<T>) -> Result<Vec<T>>
    where
        T: FromStr,
        <T as FromStr>::Err: std::fmt::Display,
    {
        let Ok(value) = self.get_string(key) else {
            return Ok(default);
        };
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| {
                item.parse::<T>().map_err(|e| {
                    GatewayError::configuration(format!("Invalid item {:?} for key {}: {}", item, key, e))
                })
            })
            .collect()
    }

    /// Get a duration expressed in whole seconds
    fn get_secs_or(&self, key: &str, default_secs: u64) -> Result<Duration> {
        self.get_or(key, default_secs).map(Duration::from_secs)
    }

    /// Get a duration expressed in milliseconds
    fn get_millis_or(&self, key: &str, default_ms: u64) -> Result<Duration> {
        self.get_or(key, default_ms).map(Duration::from_millis)
    }
}

impl<T: ConfigProvider + ?Sized> ConfigProviderExt for T {}

/// Environment variable based configuration provider
#[derive(Debug, Clone, Default)]
pub struct EnvConfigProvider {
    /// Optional prefix for environment variables
    prefix: Option<String>,

    /// Optional namespace for variables (e.g., "HOSTED", "LOCAL")
    namespace: Option<String>,
}

impl EnvConfigProvider {
    /// Create a new environment variable config provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a prefix for environment variables
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set a namespace for environment variables
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Format a configuration key as an environment variable
    pub fn format_key(&self, key: &str) -> String {
        let mut env_key = String::new();

        if let Some(ref prefix) = self.prefix {
            env_key.push_str(prefix);
            env_key.push('_');
        }

        if let Some(ref namespace) = self.namespace {
            env_key.push_str(namespace);
            env_key.push('_');
        }

        env_key.push_str(&key.to_uppercase().replace(|c: char| !c.is_ascii_alphanumeric(), "_"));

        env_key
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        let env_key = self.format_key(key);

        env::var(&env_key).map_err(|e| match e {
            env::VarError::NotPresent => {
                GatewayError::configuration(format!("Environment variable not set: {}", env_key))
            }
            env::VarError::NotUnicode(_) => GatewayError::configuration(format!(
                "Environment variable is not valid unicode: {}",
                env_key
            )),
        })
    }
}

/// In-memory config provider for testing or static configuration
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigProvider {
    values: HashMap<String, String>,
}

impl MemoryConfigProvider {
    /// Create a new empty memory config provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a configuration value
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: ToString,
    {
        self.values.insert(key.into(), value.to_string());
    }
}

impl ConfigProvider for MemoryConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| GatewayError::configuration(format!("Configuration key not found: {}", key)))
    }
}

/// Trait for backend-specific configuration sections
pub trait ServiceConfig: Debug + Send + Sync {
    /// Validate this configuration
    fn validate(&self) -> Result<()>;
}

/// Which backend adapter serves requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Demo,
    Hosted,
    Local,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "demo" | "mock" | "offline" => Ok(BackendKind::Demo),
            "hosted" | "gemini" => Ok(BackendKind::Hosted),
            "local" | "ollama" | "openai-compatible" => Ok(BackendKind::Local),
            other => Err(format!("unknown backend '{}' (expected demo, hosted or local)", other)),
        }
    }
}

/// Hosted multimodal backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedConfig {
    /// API key, required when this backend is selected
    pub api_key: Option<String>,

    /// Base URL (can be changed for proxies)
    pub base_url: String,

    /// Analysis model
    pub model: String,

    /// Text-to-speech model
    pub tts_model: String,

    /// Prebuilt voice for speech
    pub voice: String,
}

impl Default for HostedConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            tts_model: "gemini-2.5-flash-preview-tts".to_string(),
            voice: "Kore".to_string(),
        }
    }
}

impl ServiceConfig for HostedConfig {
    fn validate(&self) -> Result<()> {
        if self.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(GatewayError::configuration("Hosted backend API key is required"));
        }
        if self.base_url.is_empty() {
            return Err(GatewayError::configuration("Hosted backend base URL is required"));
        }
        if self.model.is_empty() {
            return Err(GatewayError::configuration("Hosted backend model is required"));
        }
        Ok(())
    }
}

/// Self-hosted OpenAI-compatible backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    pub base_url: String,
    pub model: String,
    /// Optional bearer token (LM Studio and most proxies accept none)
    pub api_key: Option<String>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "llama3.1".to_string(),
            api_key: None,
        }
    }
}

impl ServiceConfig for LocalConfig {
    fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(GatewayError::configuration("Local backend base URL is required"));
        }
        if self.model.is_empty() {
            return Err(GatewayError::configuration("Local backend model is required"));
        }
        Ok(())
    }
}

/// Analyze cache settings; a zero TTL or capacity disables caching
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            max_entries: 200,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Bounds applied by the request normalizer
#[derive(Debug, Clone, PartialEq)]
pub struct RequestLimits {
    pub max_images: usize,
    pub max_image_bytes: usize,
    pub max_log_chars: usize,
    pub max_question_chars: usize,
    pub max_history_turns: usize,
    pub max_speech_chars: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_images: 6,
            max_image_bytes: 5 * 1024 * 1024,
            max_log_chars: 200_000,
            max_question_chars: 2_000,
            max_history_turns: 20,
            max_speech_chars: 5_000,
        }
    }
}

/// Per-client fixed-window limits; a limit of 0 disables that class
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub analyze: u32,
    pub follow_up: u32,
    pub speech: u32,
    pub gc_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            analyze: 10,
            follow_up: 30,
            speech: 15,
            gc_interval: Duration::from_secs(120),
        }
    }
}

/// HTTP listener settings used by the API binary
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_body_bytes: usize,
    /// Peers whose `X-Forwarded-For` header is believed; empty trusts none
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8787".to_string(),
            max_body_bytes: 32 * 1024 * 1024,
            trusted_proxies: Vec::new(),
        }
    }
}

/// Complete gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub backend: BackendKind,
    pub hosted: HostedConfig,
    pub local: LocalConfig,
    pub cache: CacheConfig,
    pub limits: RequestLimits,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub server: ServerConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Demo,
            hosted: HostedConfig::default(),
            local: LocalConfig::default(),
            cache: CacheConfig::default(),
            limits: RequestLimits::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from `INCIDENT_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_provider(&EnvConfigProvider::new().with_prefix(ENV_PREFIX))
    }

    /// Load configuration from a config provider
    pub fn from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Result<Self> {
        let defaults = Self::default();

        let backend = provider.get_or("backend", defaults.backend)?;

        let hosted = HostedConfig {
            api_key: provider.get_optional("hosted_api_key"),
            base_url: provider.get_string_or("hosted_base_url", &defaults.hosted.base_url),
            model: provider.get_string_or("hosted_model", &defaults.hosted.model),
            tts_model: provider.get_string_or("hosted_tts_model", &defaults.hosted.tts_model),
            voice: provider.get_string_or("hosted_voice", &defaults.hosted.voice),
        };

        let local = LocalConfig {
            base_url: provider.get_string_or("local_base_url", &defaults.local.base_url),
            model: provider.get_string_or("local_model", &defaults.local.model),
            api_key: provider.get_optional("local_api_key"),
        };

        let cache = CacheConfig {
            ttl: provider.get_secs_or("cache_ttl_seconds", defaults.cache.ttl.as_secs())?,
            max_entries: provider.get_or("cache_max_entries", defaults.cache.max_entries)?,
            sweep_interval: provider
                .get_secs_or("cache_sweep_seconds", defaults.cache.sweep_interval.as_secs())?,
        };

        let limits = RequestLimits {
            max_images: provider.get_or("max_images", defaults.limits.max_images)?,
            max_image_bytes: provider.get_or("max_image_bytes", defaults.limits.max_image_bytes)?,
            max_log_chars: provider.get_or("max_log_chars", defaults.limits.max_log_chars)?,
            max_question_chars: provider
                .get_or("max_question_chars", defaults.limits.max_question_chars)?,
            max_history_turns: provider.get_or("max_history_turns", defaults.limits.max_history_turns)?,
            max_speech_chars: provider.get_or("max_speech_chars", defaults.limits.max_speech_chars)?,
        };

        let rate_limit = RateLimitConfig {
            window: provider
                .get_secs_or("rate_limit_window_seconds", defaults.rate_limit.window.as_secs())?,
            analyze: provider.get_or("rate_limit_analyze", defaults.rate_limit.analyze)?,
            follow_up: provider.get_or("rate_limit_follow_up", defaults.rate_limit.follow_up)?,
            speech: provider.get_or("rate_limit_speech", defaults.rate_limit.speech)?,
            gc_interval: provider
                .get_secs_or("rate_limit_gc_seconds", defaults.rate_limit.gc_interval.as_secs())?,
        };

        let retry = RetryConfig {
            max_attempts: provider.get_or("retry_max_attempts", defaults.retry.max_attempts)?,
            base_delay: provider.get_millis_or(
                "retry_base_delay_ms",
                defaults.retry.base_delay.as_millis() as u64,
            )?,
            max_delay: provider
                .get_millis_or("retry_max_delay_ms", defaults.retry.max_delay.as_millis() as u64)?,
            call_timeout: provider
                .get_millis_or("call_timeout_ms", defaults.retry.call_timeout.as_millis() as u64)?,
        };

        let server = ServerConfig {
            bind_addr: provider.get_string_or("bind_addr", &defaults.server.bind_addr),
            max_body_bytes: provider.get_or("max_body_bytes", defaults.server.max_body_bytes)?,
            trusted_proxies: provider.get_list_or("trusted_proxies", defaults.server.trusted_proxies)?,
        };

        let config = Self {
            backend,
            hosted,
            local,
            cache,
            limits,
            rate_limit,
            retry,
            server,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints and the selected backend's section
    pub fn validate(&self) -> Result<()> {
        match self.backend {
            BackendKind::Demo => {}
            BackendKind::Hosted => self.hosted.validate()?,
            BackendKind::Local => self.local.validate()?,
        }

        if self.retry.max_attempts == 0 {
            return Err(GatewayError::configuration("retry_max_attempts must be at least 1"));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(GatewayError::configuration(
                "retry_base_delay_ms must not exceed retry_max_delay_ms",
            ));
        }
        if self.retry.call_timeout.is_zero() {
            return Err(GatewayError::configuration("call_timeout_ms must be positive"));
        }
        if self.rate_limit.window.is_zero() {
            return Err(GatewayError::configuration("rate_limit_window_seconds must be positive"));
        }
        if self.limits.max_log_chars == 0 {
            return Err(GatewayError::configuration("max_log_chars must be positive"));
        }
        if self.limits.max_image_bytes == 0 {
            return Err(GatewayError::configuration("max_image_bytes must be positive"));
        }
        if self.server.max_body_bytes == 0 {
            return Err(GatewayError::configuration("max_body_bytes must be positive"));
        }

        Ok(())
    }
}
