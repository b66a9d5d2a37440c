//! Error handling for the analysis gateway
//!
//! This module provides the failure taxonomy shared by every gateway component:
//! - Validation failures raised while normalizing a request (never retried)
//! - Transient upstream failures (timeouts, rate limits, 5xx, network) that the
//!   retry engine may try again
//! - Fatal upstream failures (credentials, content safety, bad requests)
//! - Malformed model output the repair parser could not salvage
//!
//! Every variant keeps the original message so the routing layer can pick an
//! accurate status code. Errors are `Clone` because coalesced callers share a
//! single outcome.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::util::excerpt;

pub mod mapping;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Longest excerpt of offending model text carried in a `MalformedModelOutput`
pub const MAX_EXCERPT_CHARS: usize = 200;

/// Machine-classifiable failure kind exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationFailure,
    UpstreamTransient,
    UpstreamFatal,
    MalformedModelOutput,
    RateLimited,
    Configuration,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationFailure => "validation_failure",
            ErrorKind::UpstreamTransient => "upstream_transient",
            ErrorKind::UpstreamFatal => "upstream_fatal",
            ErrorKind::MalformedModelOutput => "malformed_model_output",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an upstream failure is worth another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientReason {
    Timeout,
    RateLimited,
    Server,
    Network,
}

impl fmt::Display for TransientReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimited => write!(f, "rate limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Why an upstream failure will not succeed on retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    Credentials,
    ContentSafety,
    BadRequest,
    Unknown,
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credentials => write!(f, "credentials"),
            Self::ContentSafety => write!(f, "content safety"),
            Self::BadRequest => write!(f, "bad request"),
            Self::Unknown => write!(f, "unclassified"),
        }
    }
}

/// Main error type for the gateway
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// Generic request validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// A required field was empty or absent
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Image payload is not valid base64
    #[error("Invalid image encoding: {0}")]
    InvalidImageEncoding(String),

    /// Image mime type is outside the allowlist
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Image payload exceeds the configured size
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Upstream failure that may succeed on retry
    #[error("Upstream {reason} error: {message}")]
    UpstreamTransient {
        reason: TransientReason,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Upstream failure that will not succeed on retry
    #[error("Upstream {reason} error: {message}")]
    UpstreamFatal { reason: FatalReason, message: String },

    /// The repair parser exhausted its strategies
    #[error("Malformed model output: {message}")]
    MalformedModelOutput { message: String, excerpt: String },

    /// Rejected by the gateway's own per-client limiter
    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String, retry_after: Duration },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        GatewayError::Validation(message.into())
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        GatewayError::MissingField(field.into())
    }

    /// Create an invalid image encoding error
    pub fn invalid_image_encoding(message: impl Into<String>) -> Self {
        GatewayError::InvalidImageEncoding(message.into())
    }

    /// Create an unsupported media type error
    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        GatewayError::UnsupportedMediaType(message.into())
    }

    /// Create a payload too large error
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        GatewayError::PayloadTooLarge(message.into())
    }

    /// Create a transient error
    pub fn transient(reason: TransientReason, message: impl Into<String>) -> Self {
        GatewayError::UpstreamTransient {
            reason,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::transient(TransientReason::Timeout, message)
    }

    /// Create an upstream rate limit error with an optional retry hint
    pub fn upstream_rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        GatewayError::UpstreamTransient {
            reason: TransientReason::RateLimited,
            message: message.into(),
            retry_after,
        }
    }

    /// Create an upstream server error
    pub fn server(message: impl Into<String>) -> Self {
        Self::transient(TransientReason::Server, message)
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::transient(TransientReason::Network, message)
    }

    /// Create a fatal error
    pub fn fatal(reason: FatalReason, message: impl Into<String>) -> Self {
        GatewayError::UpstreamFatal {
            reason,
            message: message.into(),
        }
    }

    /// Create a credentials error
    pub fn credentials(message: impl Into<String>) -> Self {
        Self::fatal(FatalReason::Credentials, message)
    }

    /// Create a content safety error
    pub fn content_safety(message: impl Into<String>) -> Self {
        Self::fatal(FatalReason::ContentSafety, message)
    }

    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::fatal(FatalReason::BadRequest, message)
    }

    /// Create an unclassified upstream error
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::fatal(FatalReason::Unknown, message)
    }

    /// Create a malformed output error carrying an excerpt of the raw text
    pub fn malformed_output(message: impl Into<String>, raw: &str) -> Self {
        GatewayError::MalformedModelOutput {
            message: message.into(),
            excerpt: excerpt(raw, MAX_EXCERPT_CHARS),
        }
    }

    /// Create a local rate limit rejection
    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        GatewayError::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        GatewayError::Configuration(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        GatewayError::Internal(message.into())
    }

    /// The machine-classifiable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Validation(_)
            | GatewayError::MissingField(_)
            | GatewayError::InvalidImageEncoding(_)
            | GatewayError::UnsupportedMediaType(_)
            | GatewayError::PayloadTooLarge(_) => ErrorKind::ValidationFailure,
            GatewayError::UpstreamTransient { .. } => ErrorKind::UpstreamTransient,
            GatewayError::UpstreamFatal { .. } => ErrorKind::UpstreamFatal,
            GatewayError::MalformedModelOutput { .. } => ErrorKind::MalformedModelOutput,
            GatewayError::RateLimited { .. } => ErrorKind::RateLimited,
            GatewayError::Configuration(_) => ErrorKind::Configuration,
            GatewayError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this is a retryable error
    ///
    /// Unclassified upstream failures fall back to the textual classifier,
    /// since some backends only report transient conditions in the message.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::UpstreamTransient { .. } => true,
            GatewayError::UpstreamFatal {
                reason: FatalReason::Unknown,
                message,
            } => mapping::classify_message(message)
                .map(|class| class.is_transient())
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Check if this is a permanent error (not retryable)
    pub fn is_permanent(&self) -> bool {
        !self.is_retryable()
    }

    /// Suggested wait before trying again, when the source provided one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::UpstreamTransient { retry_after, .. } => *retry_after,
            GatewayError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Convert reqwest errors to GatewayError
impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::timeout(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            GatewayError::network(format!("Connection error: {}", err))
        } else if let Some(status) = err.status() {
            mapping::map_status(status, &err.to_string(), None)
        } else if err.is_builder() || err.is_request() {
            GatewayError::bad_request(format!("Invalid request: {}", err))
        } else if err.is_decode() {
            GatewayError::upstream(format!("Response decode error: {}", err))
        } else {
            GatewayError::network(format!("HTTP client error: {}", err))
        }
    }
}

/// Convert serde_json errors to GatewayError
impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::upstream(format!("JSON error: {}", err))
    }
}
