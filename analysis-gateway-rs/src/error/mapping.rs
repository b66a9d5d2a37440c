//! Error mapping for model backend APIs
//!
//! This module converts HTTP status codes, provider error bodies and opaque
//! upstream messages into the normalized `GatewayError` taxonomy.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value;

use super::{FatalReason, GatewayError, TransientReason};
use crate::util::truncate_string;

/// Outcome of classifying an upstream message by its text alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Transient(TransientReason),
    Fatal(FatalReason),
}

impl MessageClass {
    pub fn is_transient(&self) -> bool {
        matches!(self, MessageClass::Transient(_))
    }
}

static SERVER_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b5\d\d\b").expect("static regex"));
static RATE_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b429\b").expect("static regex"));

/// Classify an opaque upstream message
///
/// Returns `None` when the text carries no recognizable signal.
pub fn classify_message(message: &str) -> Option<MessageClass> {
    let lower = message.to_lowercase();

    if RATE_STATUS.is_match(&lower)
        || lower.contains("rate limit")
        || lower.contains("resource_exhausted")
        || lower.contains("quota")
        || lower.contains("too many requests")
    {
        return Some(MessageClass::Transient(TransientReason::RateLimited));
    }

    if lower.contains("timed out") || lower.contains("timeout") || lower.contains("deadline_exceeded") {
        return Some(MessageClass::Transient(TransientReason::Timeout));
    }

    if lower.contains("connection reset")
        || lower.contains("connection refused")
        || lower.contains("broken pipe")
        || lower.contains("econnreset")
    {
        return Some(MessageClass::Transient(TransientReason::Network));
    }

    if lower.contains("unavailable")
        || lower.contains("overloaded")
        || lower.contains("internal error")
        || SERVER_STATUS.is_match(&lower)
    {
        return Some(MessageClass::Transient(TransientReason::Server));
    }

    if lower.contains("safety") || lower.contains("blocked") {
        return Some(MessageClass::Fatal(FatalReason::ContentSafety));
    }

    if lower.contains("api key")
        || lower.contains("unauthenticated")
        || lower.contains("permission_denied")
        || lower.contains("unauthorized")
    {
        return Some(MessageClass::Fatal(FatalReason::Credentials));
    }

    None
}

/// Map a status code and message to a GatewayError
pub fn map_status(status: StatusCode, message: &str, retry_after: Option<Duration>) -> GatewayError {
    match status.as_u16() {
        401 | 403 => GatewayError::credentials(message),
        429 => GatewayError::upstream_rate_limited(message, retry_after),
        408 => GatewayError::timeout(message),
        500..=599 => GatewayError::UpstreamTransient {
            reason: TransientReason::Server,
            message: message.to_string(),
            retry_after,
        },
        400 | 404 | 422 => match classify_message(message) {
            Some(MessageClass::Fatal(FatalReason::ContentSafety)) => GatewayError::content_safety(message),
            _ => GatewayError::bad_request(message),
        },
        _ => GatewayError::upstream(message),
    }
}

/// Pull the human message out of a provider error body
///
/// Handles `{"error": {"message": ..}}` (hosted and OpenAI-compatible),
/// `{"error": ".."}` (Ollama) and `{"message": ".."}`.
pub fn extract_error_message(json: &Value) -> Option<String> {
    if let Some(error) = json.get("error") {
        if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
            let status = error.get("status").and_then(|s| s.as_str());
            return Some(match status {
                Some(status) => format!("{} ({})", message, status),
                None => message.to_string(),
            });
        }
        if let Some(message) = error.as_str() {
            return Some(message.to_string());
        }
    }
    json.get("message")
        .and_then(|m| m.as_str())
        .map(|m| m.to_string())
}

/// Map a failed HTTP response from a backend to a GatewayError
pub fn map_http_error(
    service: &str,
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> GatewayError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| extract_error_message(&json))
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.to_string()
            } else {
                truncate_string(body.trim(), 200)
            }
        });

    let message = format!("{} returned {}: {}", service, status.as_u16(), detail);
    map_status(status, &message, retry_after)
}

/// Upper bound applied to upstream `Retry-After` hints
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Read a `Retry-After` header given in seconds, capped at `MAX_RETRY_AFTER`
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| *secs >= 0.0)
        .map(|secs| Duration::try_from_secs_f64(secs).map_or(MAX_RETRY_AFTER, |d| d.min(MAX_RETRY_AFTER)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use test_case::test_case;

    #[test_case(401, ErrorKind::UpstreamFatal ; "unauthorized")]
    #[test_case(403, ErrorKind::UpstreamFatal ; "forbidden")]
    #[test_case(400, ErrorKind::UpstreamFatal ; "bad request")]
    #[test_case(404, ErrorKind::UpstreamFatal ; "unknown model")]
    #[test_case(408, ErrorKind::UpstreamTransient ; "request timeout")]
    #[test_case(429, ErrorKind::UpstreamTransient ; "too many requests")]
    #[test_case(500, ErrorKind::UpstreamTransient ; "internal")]
    #[test_case(503, ErrorKind::UpstreamTransient ; "unavailable")]
    fn test_map_status_kind(code: u16, expected: ErrorKind) {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(map_status(status, "boom", None).kind(), expected);
    }

    #[test]
    fn test_map_http_error_reads_hosted_body() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = map_http_error("hosted", StatusCode::TOO_MANY_REQUESTS, body, Some(Duration::from_secs(7)));
        assert!(err.to_string().contains("Quota exceeded (RESOURCE_EXHAUSTED)"));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_map_http_error_detects_safety_block() {
        let body = r#"{"error":{"message":"Request blocked by safety filters"}}"#;
        let err = map_http_error("hosted", StatusCode::BAD_REQUEST, body, None);
        assert!(matches!(
            err,
            GatewayError::UpstreamFatal { reason: FatalReason::ContentSafety, .. }
        ));
    }

    #[test]
    fn test_map_http_error_plain_body() {
        let err = map_http_error("local", StatusCode::BAD_GATEWAY, "upstream went away", None);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("upstream went away"));
    }

    #[test_case("HTTP 429 from provider", Some(MessageClass::Transient(TransientReason::RateLimited)) ; "status 429")]
    #[test_case("RESOURCE_EXHAUSTED: try later", Some(MessageClass::Transient(TransientReason::RateLimited)) ; "exhausted")]
    #[test_case("The model is UNAVAILABLE", Some(MessageClass::Transient(TransientReason::Server)) ; "unavailable")]
    #[test_case("got 502 bad gateway", Some(MessageClass::Transient(TransientReason::Server)) ; "5xx code")]
    #[test_case("operation timed out", Some(MessageClass::Transient(TransientReason::Timeout)) ; "timed out")]
    #[test_case("connection reset by peer", Some(MessageClass::Transient(TransientReason::Network)) ; "reset")]
    #[test_case("API key not valid", Some(MessageClass::Fatal(FatalReason::Credentials)) ; "credentials")]
    #[test_case("nothing to see here", None ; "unrecognized")]
    fn test_classify_message(message: &str, expected: Option<MessageClass>) {
        assert_eq!(classify_message(message), expected);
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, "12".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
    }

    #[test_case("1e300", Some(MAX_RETRY_AFTER) ; "huge exponent")]
    #[test_case("inf", Some(MAX_RETRY_AFTER) ; "infinity")]
    #[test_case("86400", Some(MAX_RETRY_AFTER) ; "one day")]
    #[test_case("NaN", None ; "not a number")]
    #[test_case("-5", None ; "negative")]
    #[test_case("Wed, 21 Oct 2015 07:28:00 GMT", None ; "http date")]
    fn test_parse_retry_after_bounds(value: &str, expected: Option<Duration>) {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, value.parse().unwrap());
        assert_eq!(parse_retry_after(&headers), expected);
    }

    #[test]
    fn test_huge_retry_after_stays_rate_limited() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "1e300".parse().unwrap());
        let err = map_http_error("hosted", StatusCode::TOO_MANY_REQUESTS, "quota", parse_retry_after(&headers));
        assert!(matches!(
            err,
            GatewayError::UpstreamTransient { reason: TransientReason::RateLimited, .. }
        ));
        assert_eq!(err.retry_after(), Some(MAX_RETRY_AFTER));
    }
}
