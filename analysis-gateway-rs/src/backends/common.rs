//! Common utilities for HTTP backends

use std::fmt;
use std::time::Duration;

use reqwest::{header, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::mapping::{map_http_error, parse_retry_after};
use crate::error::{GatewayError, Result};
use crate::util::{measure_time_async, sanitize_for_logging, truncate_string};

/// UserAgent structure for identifying the gateway to upstream services
#[derive(Debug, Clone)]
pub struct UserAgent {
    pub app_name: String,
    pub version: String,
    pub extra: Option<String>,
}

impl Default for UserAgent {
    fn default() -> Self {
        Self {
            app_name: "incident-analysis-gateway".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            extra: None,
        }
    }
}

impl UserAgent {
    /// Default agent tagged with a backend name
    pub fn for_backend(name: &str) -> Self {
        Self {
            extra: Some(name.to_string()),
            ..Self::default()
        }
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_name, self.version)?;
        if let Some(ref extra) = self.extra {
            write!(f, " ({})", extra)?;
        }
        Ok(())
    }
}

/// Build the HTTP client shared by a backend
///
/// Only connection setup is bounded here; whole-call deadlines are applied by
/// the retry engine.
pub fn build_http_client(user_agent: UserAgent) -> Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::USER_AGENT,
        header::HeaderValue::from_str(&user_agent.to_string())
            .map_err(|e| GatewayError::configuration(format!("Invalid user agent: {}", e)))?,
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| GatewayError::configuration(format!("Failed to build HTTP client: {}", e)))
}

/// Send a request and decode a JSON body, mapping failures onto the taxonomy
pub async fn send_json<R>(service: &str, endpoint: &str, request: RequestBuilder) -> Result<R>
where
    R: DeserializeOwned,
{
    debug!(service = service, endpoint = endpoint, "Sending backend request");

    let (response, elapsed) = measure_time_async(|| request.send()).await;
    let response = response?;
    let status = response.status();

    if !status.is_success() {
        let error = parse_error_response(service, response).await;
        warn!(
            service = service,
            endpoint = endpoint,
            status = status.as_u16(),
            duration_ms = %elapsed.as_millis(),
            error = %sanitize_for_logging(&error.to_string()),
            "Backend request failed"
        );
        return Err(error);
    }

    let body = response.text().await?;
    debug!(
        service = service,
        endpoint = endpoint,
        status = status.as_u16(),
        duration_ms = %elapsed.as_millis(),
        bytes = body.len(),
        "Backend request succeeded"
    );

    serde_json::from_str::<R>(&body).map_err(|e| {
        GatewayError::upstream(format!(
            "{} returned an unexpected response body ({}): {}",
            service,
            e,
            truncate_string(&body, 200)
        ))
    })
}

/// Parse error response from HTTP response
pub async fn parse_error_response(service: &str, response: reqwest::Response) -> GatewayError {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => format!("Failed to read error response: {}", e),
    };

    map_http_error(service, status, &body, retry_after)
}
