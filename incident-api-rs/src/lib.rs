// incident-api-rs/src/lib.rs
// HTTP binding for the incident analysis gateway
//
// Routes:
// - POST /api/analyze    logs and screenshots in, structured report out
// - POST /api/follow-up  question about a report in, answer out
// - POST /api/speech     text in, audio bytes out
// - GET  /health         liveness plus gateway stats

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use analysis_gateway::{
    AnalysisGateway, GatewayStats, RawAnalyzeRequest, RawFollowUpRequest, RawSpeechRequest, Report,
    ResultSource, SpeechOutput,
};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, DefaultBodyLimit, Extension, Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

pub mod error;

pub use error::{ApiError, ErrorBody, ErrorResponse};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const DEFAULT_LOG_FILTER: &str = "info,analysis_gateway=debug,incident_api=debug";

/// Shared application state
pub struct AppState {
    pub gateway: Arc<AnalysisGateway>,
    trusted_proxies: Vec<IpAddr>,
    started: Instant,
}

impl AppState {
    fn client_key(&self, peer: Option<ConnectInfo<SocketAddr>>, headers: &HeaderMap) -> String {
        client_key(peer.map(|ConnectInfo(addr)| addr), headers, &self.trusted_proxies)
    }
}

/// Identifier assigned to each request by the request-id middleware
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    fn reject(&self, err: impl Into<ApiError>) -> Response {
        err.into().to_response(&self.0)
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeMeta<'a> {
    source: ResultSource,
    cache_key: &'a str,
    log_truncated: bool,
    dropped_images: usize,
    backend: &'a str,
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse<'a> {
    report: &'a Report,
    meta: AnalyzeMeta<'a>,
}

#[derive(Debug, Serialize)]
struct FollowUpResponse {
    answer: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    uptime_seconds: u64,
    gateway: GatewayStats,
}

/// Build the router with all middleware attached
pub fn create_router(gateway: Arc<AnalysisGateway>) -> Router {
    let max_body_bytes = gateway.config().server.max_body_bytes;
    let trusted_proxies = gateway.config().server.trusted_proxies.clone();
    let state = Arc::new(AppState {
        gateway,
        trusted_proxies,
        started: Instant::now(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/api/analyze", post(analyze_handler))
        .route("/api/follow-up", post(follow_up_handler))
        .route("/api/speech", post(speech_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` selects the filter; `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

/// Caller identity used for rate limiting
///
/// The peer address, unless the peer is a trusted proxy: then the nearest
/// `X-Forwarded-For` hop that is not itself a trusted proxy. Requests with no
/// known peer share one bucket.
pub fn client_key(peer: Option<SocketAddr>, headers: &HeaderMap, trusted_proxies: &[IpAddr]) -> String {
    let Some(peer) = peer else {
        return "anonymous".to_string();
    };
    let peer_ip = peer.ip();
    if !trusted_proxies.contains(&peer_ip) {
        return peer_ip.to_string();
    }

    let hops: Vec<&str> = headers
        .get_all(FORWARDED_FOR_HEADER)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .collect();

    for hop in hops.iter().rev() {
        match hop.parse::<IpAddr>() {
            Ok(ip) if trusted_proxies.contains(&ip) => continue,
            Ok(ip) => return ip.to_string(),
            Err(_) => break,
        }
    }

    peer_ip.to_string()
}

async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let id = Uuid::new_v4().to_string();
    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "incident-api",
        "endpoints": ["/health", "/api/analyze", "/api/follow-up", "/api/speech"],
    }))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        service: "incident-api",
        uptime_seconds: state.started.elapsed().as_secs(),
        gateway: state.gateway.stats(),
    })
}

async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<RawAnalyzeRequest>, JsonRejection>,
) -> Response {
    let Json(raw) = match body {
        Ok(body) => body,
        Err(rejection) => return request_id.reject(error::from_json_rejection(rejection)),
    };

    let client = state.client_key(peer, &headers);
    match state.gateway.analyze(&client, raw).await {
        Ok(outcome) => Json(AnalyzeResponse {
            report: &outcome.report,
            meta: AnalyzeMeta {
                source: outcome.source,
                cache_key: outcome.cache_key.as_str(),
                log_truncated: outcome.log_truncated,
                dropped_images: outcome.dropped_images,
                backend: state.gateway.backend_identity(),
            },
        })
        .into_response(),
        Err(err) => request_id.reject(err),
    }
}

async fn follow_up_handler(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<RawFollowUpRequest>, JsonRejection>,
) -> Response {
    let Json(raw) = match body {
        Ok(body) => body,
        Err(rejection) => return request_id.reject(error::from_json_rejection(rejection)),
    };

    let client = state.client_key(peer, &headers);
    match state.gateway.follow_up(&client, raw).await {
        Ok(answer) => Json(FollowUpResponse { answer }).into_response(),
        Err(err) => request_id.reject(err),
    }
}

async fn speech_handler(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<RawSpeechRequest>, JsonRejection>,
) -> Response {
    let Json(raw) = match body {
        Ok(body) => body,
        Err(rejection) => return request_id.reject(error::from_json_rejection(rejection)),
    };

    let client = state.client_key(peer, &headers);
    match state.gateway.speak(&client, raw.text.as_deref()).await {
        Ok(SpeechOutput::Audio { mime_type, bytes }) => {
            ([(header::CONTENT_TYPE, mime_type)], bytes).into_response()
        }
        Ok(SpeechOutput::Unsupported { reason }) => request_id.reject(ApiError::SpeechUnsupported(reason)),
        Err(err) => request_id.reject(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_gateway::{DemoBackend, GatewayConfig};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request as HttpRequest, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app_with(config: GatewayConfig) -> Router {
        let gateway = AnalysisGateway::new(config, Arc::new(DemoBackend::new()));
        create_router(Arc::new(gateway))
    }

    fn app() -> Router {
        app_with(GatewayConfig::default())
    }

    fn post_json(uri: &str, body: Value) -> HttpRequest<Body> {
        post_json_from(uri, body, "198.51.100.7:40000")
    }

    fn post_json_from(uri: &str, body: Value, peer: &str) -> HttpRequest<Body> {
        let mut request = HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    async fn send(app: &Router, request: HttpRequest<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let request = HttpRequest::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, headers, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["gateway"]["backend"], "demo:heuristic-v1");
        assert_eq!(body["gateway"]["cache_entries"], 0);
        assert!(headers.contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_analyze_then_cached() {
        let app = app();
        let payload = json!({"logText": "ERROR connection refused to db:5432"});

        let (status, headers, first) = send(&app, post_json("/api/analyze", payload.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["meta"]["source"], "fresh");
        assert_eq!(first["meta"]["backend"], "demo:heuristic-v1");
        assert!(first["report"]["title"].is_string());
        let id = headers[REQUEST_ID_HEADER].to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());

        let (status, _, second) = send(&app, post_json("/api/analyze", payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["meta"]["source"], "cached");
        assert_eq!(second["meta"]["cache_key"], first["meta"]["cache_key"]);
        assert_eq!(second["report"], first["report"]);
    }

    #[tokio::test]
    async fn test_empty_analyze_is_validation_failure() {
        let app = app();
        let (status, headers, body) = send(&app, post_json("/api/analyze", json!({}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "validation_failure");
        assert_eq!(
            body["error"]["request_id"],
            headers[REQUEST_ID_HEADER].to_str().unwrap()
        );
    }

    #[tokio::test]
    async fn test_unsupported_image_type() {
        let app = app();
        let payload = json!({
            "logText": "boom",
            "images": [{"mimeType": "application/pdf", "data": "aGVsbG8="}]
        });
        let (status, _, body) = send(&app, post_json("/api/analyze", payload)).await;

        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body["error"]["kind"], "validation_failure");
    }

    #[tokio::test]
    async fn test_malformed_json_body() {
        let app = app();
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/api/analyze")
            .header("content-type", "application/json")
            .body(Body::from("{\"logText\": "))
            .unwrap();
        let (status, _, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "validation_failure");
    }

    #[tokio::test]
    async fn test_missing_content_type() {
        let app = app();
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/api/analyze")
            .body(Body::from("{\"logText\": \"boom\"}"))
            .unwrap();
        let (status, _, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body["error"]["kind"], "validation_failure");
    }

    #[tokio::test]
    async fn test_body_limit() {
        let mut config = GatewayConfig::default();
        config.server.max_body_bytes = 64;
        let app = app_with(config);

        let payload = json!({"logText": "x".repeat(1024)});
        let (status, _, _) = send(&app, post_json("/api/analyze", payload)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_rate_limited_per_client() {
        let mut config = GatewayConfig::default();
        config.rate_limit.analyze = 1;
        let app = app_with(config);
        let payload = json!({"logText": "WARN slow query"});

        let (status, _, _) = send(&app, post_json("/api/analyze", payload.clone())).await;
        assert_eq!(status, StatusCode::OK);

        let (status, headers, body) = send(&app, post_json("/api/analyze", payload.clone())).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["kind"], "rate_limited");
        let retry_after: u64 = headers[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
        assert!((1..=60).contains(&retry_after));
        assert_eq!(body["error"]["retry_after_seconds"], retry_after);

        let other = post_json_from("/api/analyze", payload, "198.51.100.8:40000");
        let (status, _, _) = send(&app, other).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_forwarded_for_ignored_from_untrusted_peer() {
        let mut config = GatewayConfig::default();
        config.rate_limit.analyze = 1;
        let app = app_with(config);

        let mut accepted = 0;
        for i in 0..20 {
            let mut request = post_json("/api/analyze", json!({"logText": "WARN slow query"}));
            request.headers_mut().insert(
                FORWARDED_FOR_HEADER,
                HeaderValue::from_str(&format!("10.0.0.{}", i)).unwrap(),
            );
            let (status, _, _) = send(&app, request).await;
            if status == StatusCode::OK {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }

    #[tokio::test]
    async fn test_forwarded_for_honoured_behind_trusted_proxy() {
        let mut config = GatewayConfig::default();
        config.rate_limit.analyze = 1;
        config.server.trusted_proxies = vec!["10.1.1.1".parse().unwrap()];
        let app = app_with(config);

        for client in ["203.0.113.1", "203.0.113.2"] {
            let mut request = post_json_from("/api/analyze", json!({"logText": "WARN slow query"}), "10.1.1.1:5000");
            request
                .headers_mut()
                .insert(FORWARDED_FOR_HEADER, HeaderValue::from_str(client).unwrap());
            let (status, _, _) = send(&app, request).await;
            assert_eq!(status, StatusCode::OK, "{client} should have its own bucket");
        }
    }

    #[tokio::test]
    async fn test_follow_up() {
        let app = app();
        let payload = json!({
            "report": {"title": "Checkout outage", "severity": "high"},
            "history": [{"role": "user", "text": "What happened?"}],
            "question": "What failed first?"
        });
        let (status, _, body) = send(&app, post_json("/api/follow-up", payload)).await;

        assert_eq!(status, StatusCode::OK);
        let answer = body["answer"].as_str().unwrap();
        assert!(answer.contains("Checkout outage"));
    }

    #[tokio::test]
    async fn test_follow_up_without_question() {
        let app = app();
        let payload = json!({"report": {"title": "Checkout outage"}});
        let (status, _, body) = send(&app, post_json("/api/follow-up", payload)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "validation_failure");
    }

    #[tokio::test]
    async fn test_speech_unsupported_on_demo() {
        let app = app();
        let (status, _, body) = send(&app, post_json("/api/speech", json!({"text": "All clear"}))).await;

        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["error"]["kind"], "unsupported");
    }

    fn forwarded(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_client_key_uses_peer_address() {
        let peer: SocketAddr = "198.51.100.7:40000".parse().unwrap();
        let headers = forwarded("203.0.113.9");
        assert_eq!(client_key(Some(peer), &headers, &[]), "198.51.100.7");
        assert_eq!(client_key(None, &headers, &[]), "anonymous");
    }

    #[test]
    fn test_client_key_walks_trusted_hops() {
        let proxy: SocketAddr = "10.1.1.1:5000".parse().unwrap();
        let trusted: Vec<IpAddr> = vec!["10.1.1.1".parse().unwrap(), "10.1.1.2".parse().unwrap()];

        // Left-most entries are client-supplied; the nearest untrusted hop wins
        let headers = forwarded("1.2.3.4, 203.0.113.9, 10.1.1.2");
        assert_eq!(client_key(Some(proxy), &headers, &trusted), "203.0.113.9");

        assert_eq!(client_key(Some(proxy), &HeaderMap::new(), &trusted), "10.1.1.1");
        assert_eq!(client_key(Some(proxy), &forwarded("garbage"), &trusted), "10.1.1.1");
    }
}
