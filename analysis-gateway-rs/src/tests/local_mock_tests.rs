//! Mock tests for the local OpenAI-compatible backend
//!
//! These tests use WireMock to simulate a chat completion server.

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::backends::{Backend, LocalBackend};
    use crate::config::{LocalConfig, RequestLimits};
    use crate::error::{ErrorKind, GatewayError};
    use crate::normalize::{normalize_analyze, normalize_follow_up};
    use crate::report::Severity;
    use crate::request::{ConversationTurn, RawAnalyzeRequest, RawFollowUpRequest, RawImage, Role};

    fn create_backend(server: &MockServer, api_key: Option<&str>) -> LocalBackend {
        LocalBackend::new(LocalConfig {
            base_url: format!("{}/v1", server.uri()),
            model: "llama-test".to_string(),
            api_key: api_key.map(str::to_string),
        })
        .expect("local backend")
    }

    fn completion(content: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "model": "llama-test",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })
    }

    #[tokio::test]
    async fn test_analyze_is_text_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                "Sure! {\"title\": \"Disk pressure\", \"severity\": \"low\", tags: [\"disk\",],}",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let backend = create_backend(&server, None);
        let raw = RawAnalyzeRequest {
            log_text: Some("WARN disk 91% full".to_string()),
            images: vec![RawImage::DataUrl("data:image/png;base64,aGVsbG8=".to_string())],
            grounding_enabled: false,
        };
        let request = normalize_analyze(raw, &RequestLimits::default(), backend.identity()).unwrap();
        let report = backend.analyze(&request).await.unwrap();

        assert_eq!(report.severity, Severity::Low);
        assert_eq!(report.tags, vec!["disk".to_string()]);

        let requests = server.received_requests().await.unwrap();
        let sent: Value = requests[0].body_json().unwrap();
        assert_eq!(sent["model"], "llama-test");
        assert_eq!(sent["stream"], false);
        assert_eq!(sent["messages"][0]["role"], "system");
        let prompt = sent["messages"][1]["content"].as_str().unwrap();
        assert!(prompt.contains("cannot view"));
        assert!(!prompt.contains("aGVsbG8="));
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_bearer_key_and_follow_up_roles() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer local-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Restart the pool.\n")))
            .mount(&server)
            .await;

        let backend = create_backend(&server, Some("local-secret"));
        let request = normalize_follow_up(
            RawFollowUpRequest {
                report: json!({"title": "Pool exhaustion"}),
                history: vec![ConversationTurn {
                    role: Role::Assistant,
                    text: "The pool filled up.".to_string(),
                }],
                question: Some("What now?".to_string()),
            },
            &RequestLimits::default(),
        )
        .unwrap();

        assert_eq!(backend.follow_up(&request).await.unwrap(), "Restart the pool.");

        let requests = server.received_requests().await.unwrap();
        let sent: Value = requests[0].body_json().unwrap();
        let roles: Vec<&str> = sent["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "assistant", "user"]);
    }

    #[tokio::test]
    async fn test_empty_choices_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let backend = create_backend(&server, None);
        let request = normalize_analyze(
            RawAnalyzeRequest {
                log_text: Some("boom".to_string()),
                ..RawAnalyzeRequest::default()
            },
            &RequestLimits::default(),
            backend.identity(),
        )
        .unwrap();

        let err = backend.analyze(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamFatal);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_openai_style_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": {"message": "model failed to load", "type": "server_error"}
            })))
            .mount(&server)
            .await;

        let backend = create_backend(&server, None);
        let request = normalize_analyze(
            RawAnalyzeRequest {
                log_text: Some("boom".to_string()),
                ..RawAnalyzeRequest::default()
            },
            &RequestLimits::default(),
            backend.identity(),
        )
        .unwrap();

        let err = backend.analyze(&request).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, GatewayError::UpstreamTransient { .. }));
        assert!(err.to_string().contains("model failed to load"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let backend = LocalBackend::new(LocalConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            ..LocalConfig::default()
        })
        .unwrap();
        let request = normalize_analyze(
            RawAnalyzeRequest {
                log_text: Some("boom".to_string()),
                ..RawAnalyzeRequest::default()
            },
            &RequestLimits::default(),
            backend.identity(),
        )
        .unwrap();

        let err = backend.analyze(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamTransient);
    }
}
