//! Local OpenAI-compatible backend
//!
//! Targets self-hosted chat completion servers (Ollama, vLLM, llama.cpp).
//! These models are treated as text only: screenshots are counted in the
//! prompt but never sent, and speech is unsupported.

mod models;
pub use models::*;

use async_trait::async_trait;
use reqwest::Client;

use super::common::{build_http_client, send_json, UserAgent};
use super::prompt::{
    build_text_only_prompt, report_context, role_name, ANALYSIS_SYSTEM_PROMPT, FOLLOW_UP_SYSTEM_PROMPT,
};
use super::{Backend, SpeechOutput};
use crate::config::LocalConfig;
use crate::error::{GatewayError, Result};
use crate::repair::parse_report;
use crate::report::Report;
use crate::request::{AnalyzeRequest, FollowUpRequest};

const SERVICE: &str = "local";

/// Client for an OpenAI-compatible chat completion server
pub struct LocalBackend {
    http_client: Client,
    config: LocalConfig,
    identity: String,
}

impl LocalBackend {
    pub fn new(config: LocalConfig) -> Result<Self> {
        let http_client = build_http_client(UserAgent::for_backend(SERVICE))?;
        let identity = format!("{}:{}", SERVICE, config.model);
        Ok(Self {
            http_client,
            config,
            identity,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Send a chat completion request and return the first choice's text
    async fn complete(&self, messages: Vec<ChatMessage>, temperature: f32) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: Some(temperature),
            stream: false,
            ..ChatCompletionRequest::default()
        };

        let mut builder = self.http_client.post(self.endpoint()).json(&request);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let response: ChatCompletionResponse = send_json(SERVICE, "chat/completions", builder).await?;
        response
            .content()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::upstream(format!("{} returned no completion choices", SERVICE)))
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn analyze(&self, request: &AnalyzeRequest) -> Result<Report> {
        let messages = vec![
            ChatMessage::new("system", ANALYSIS_SYSTEM_PROMPT),
            ChatMessage::new("user", build_text_only_prompt(request)),
        ];
        let text = self.complete(messages, 0.2).await?;
        parse_report(&text)
    }

    async fn follow_up(&self, request: &FollowUpRequest) -> Result<String> {
        let mut messages = Vec::with_capacity(request.history().len() + 2);
        messages.push(ChatMessage::new(
            "system",
            format!("{}\n\n{}", FOLLOW_UP_SYSTEM_PROMPT, report_context(request.report())),
        ));
        messages.extend(
            request
                .history()
                .iter()
                .map(|turn| ChatMessage::new(role_name(turn.role, "assistant"), turn.text.clone())),
        );
        messages.push(ChatMessage::new("user", request.question()));

        let answer = self.complete(messages, 0.3).await?;
        Ok(answer.trim().to_string())
    }

    async fn speak(&self, _text: &str) -> Result<SpeechOutput> {
        Ok(SpeechOutput::Unsupported {
            reason: format!("{} does not support speech synthesis", self.identity),
        })
    }
}
