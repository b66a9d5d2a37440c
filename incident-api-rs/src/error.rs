// incident-api-rs/src/error.rs
// Error envelope returned by every failing endpoint

use std::time::Duration;

use analysis_gateway::{ErrorKind, GatewayError};
use axum::extract::rejection::JsonRejection;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the HTTP layer
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("{0}")]
    SpeechUnsupported(String),
}

/// Body of an error response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

/// `{"error": {...}}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

impl ApiError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            Self::SpeechUnsupported(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Gateway(err) => match err {
                GatewayError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
                _ => match err.kind() {
                    ErrorKind::ValidationFailure => StatusCode::BAD_REQUEST,
                    ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                    ErrorKind::UpstreamTransient => StatusCode::SERVICE_UNAVAILABLE,
                    ErrorKind::UpstreamFatal | ErrorKind::MalformedModelOutput => StatusCode::BAD_GATEWAY,
                    ErrorKind::Configuration | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                },
            },
        }
    }

    /// Machine-readable kind placed in the envelope
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SpeechUnsupported(_) => "unsupported",
            Self::Gateway(err) => err.kind().as_str(),
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Gateway(err) => err.retry_after(),
            Self::SpeechUnsupported(_) => None,
        }
    }

    /// Render the envelope, tagging it with the request id
    pub fn to_response(&self, request_id: &str) -> Response {
        let status = self.status();
        let retry_after_seconds = self.retry_after().map(ceil_seconds);

        if status.is_server_error() {
            tracing::warn!(request_id, kind = self.kind(), status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::debug!(request_id, kind = self.kind(), status = status.as_u16(), error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            error: ErrorBody {
                kind: self.kind(),
                message: self.to_string(),
                request_id: request_id.to_string(),
                retry_after_seconds,
            },
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = retry_after_seconds {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

/// Map a body extraction failure onto the gateway taxonomy
pub fn from_json_rejection(rejection: JsonRejection) -> ApiError {
    let message = rejection.body_text();
    let err = match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => GatewayError::payload_too_large(message),
        StatusCode::UNSUPPORTED_MEDIA_TYPE => GatewayError::unsupported_media_type(message),
        _ => GatewayError::validation(message),
    };
    ApiError::Gateway(err)
}

fn ceil_seconds(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}
