//! Hosted multimodal model backend
//!
//! Talks to a `generateContent` style REST API. Screenshots travel as inline
//! data parts, grounding enables the web search tool and its sources become
//! report references, and speech uses a separate TTS model whose base64 PCM
//! output is wrapped into a WAV container.

mod models;
pub use models::*;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use tracing::debug;

use super::common::{build_http_client, send_json, UserAgent};
use super::prompt::{
    build_analysis_prompt, report_context, role_name, speech_prompt, ANALYSIS_SYSTEM_PROMPT,
    FOLLOW_UP_SYSTEM_PROMPT,
};
use super::{Backend, SpeechOutput};
use crate::config::HostedConfig;
use crate::error::{GatewayError, Result};
use crate::repair::parse_report;
use crate::report::{Reference, Report};
use crate::request::{AnalyzeRequest, FollowUpRequest};

const SERVICE: &str = "hosted";
const DEFAULT_PCM_RATE: u32 = 24_000;
const BLOCKING_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

/// Hosted model client
pub struct HostedBackend {
    http_client: Client,
    config: HostedConfig,
    api_key: String,
    identity: String,
}

impl HostedBackend {
    /// Create a backend; the configuration must carry an API key
    pub fn new(config: HostedConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| GatewayError::configuration("Hosted backend API key is required"))?;
        let http_client = build_http_client(UserAgent::for_backend(SERVICE))?;
        let identity = format!("{}:{}", SERVICE, config.model);

        Ok(Self {
            http_client,
            config,
            api_key,
            identity,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        )
    }

    async fn generate(&self, model: &str, request: &GenerateContentRequest) -> Result<GenerateContentResponse> {
        let builder = self
            .http_client
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .json(request);

        let response: GenerateContentResponse = send_json(SERVICE, "generateContent", builder).await?;
        check_blocked(&response)?;
        Ok(response)
    }
}

/// Reject responses the provider withheld for safety reasons
fn check_blocked(response: &GenerateContentResponse) -> Result<()> {
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|feedback| feedback.block_reason.as_deref())
    {
        return Err(GatewayError::content_safety(format!("prompt blocked by provider: {}", reason)));
    }

    if response.text().is_none() && response.inline_data().is_none() {
        if let Some(reason) = response
            .candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .filter(|r| BLOCKING_FINISH_REASONS.contains(r))
        {
            return Err(GatewayError::content_safety(format!("response withheld by provider: {}", reason)));
        }
    }

    Ok(())
}

/// Web sources cited by a grounded response
fn grounding_references(response: &GenerateContentResponse) -> Vec<Reference> {
    response
        .candidates
        .iter()
        .filter_map(|c| c.grounding_metadata.as_ref())
        .flat_map(|m| m.grounding_chunks.iter())
        .filter_map(|chunk| chunk.web.as_ref())
        .filter_map(|web| {
            let url = web.uri.clone()?;
            Some(Reference {
                title: web.title.clone().unwrap_or_else(|| url.clone()),
                url,
            })
        })
        .collect()
}

/// Sample rate from a mime type such as `audio/L16;codec=pcm;rate=24000`
fn pcm_rate(mime_type: &str) -> Option<u32> {
    let lower = mime_type.to_ascii_lowercase();
    if !(lower.starts_with("audio/l16") || lower.starts_with("audio/pcm")) {
        return None;
    }
    Some(
        lower
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
            .unwrap_or(DEFAULT_PCM_RATE),
    )
}

/// Wrap 16-bit little-endian mono PCM in a WAV header
pub fn wav_from_pcm16(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let block_align = channels * bits_per_sample / 8;
    let byte_rate = sample_rate * u32::from(block_align);
    let data_len = pcm.len() as u32;

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}

#[async_trait]
impl Backend for HostedBackend {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn analyze(&self, request: &AnalyzeRequest) -> Result<Report> {
        let mut parts = vec![Part::text(build_analysis_prompt(request))];
        parts.extend(
            request
                .images()
                .iter()
                .map(|image| Part::inline(image.mime_type.clone(), image.data.clone())),
        );

        let grounded = request.grounding_enabled();
        let body = GenerateContentRequest {
            contents: vec![Content::user(parts)],
            system_instruction: Some(Content::system(ANALYSIS_SYSTEM_PROMPT)),
            generation_config: Some(GenerationConfig {
                temperature: Some(0.2),
                response_mime_type: (!grounded).then(|| "application/json".to_string()),
                ..GenerationConfig::default()
            }),
            tools: grounded.then(|| {
                vec![Tool {
                    google_search: Some(GoogleSearch {}),
                }]
            }),
        };

        let response = self.generate(&self.config.model, &body).await?;
        let text = response
            .text()
            .ok_or_else(|| GatewayError::upstream(format!("{} returned no analysis text", SERVICE)))?;

        let mut report = parse_report(&text)?;
        let references = grounding_references(&response);
        if !references.is_empty() {
            debug!(count = references.len(), "Attaching grounding references");
            report.merge_references(references);
        }
        Ok(report)
    }

    async fn follow_up(&self, request: &FollowUpRequest) -> Result<String> {
        let mut contents: Vec<Content> = request
            .history()
            .iter()
            .map(|turn| Content::with_role(role_name(turn.role, "model"), turn.text.clone()))
            .collect();
        contents.push(Content::with_role("user", request.question()));

        let body = GenerateContentRequest {
            contents,
            system_instruction: Some(Content::system(format!(
                "{}\n\n{}",
                FOLLOW_UP_SYSTEM_PROMPT,
                report_context(request.report())
            ))),
            generation_config: Some(GenerationConfig {
                temperature: Some(0.3),
                ..GenerationConfig::default()
            }),
            tools: None,
        };

        let response = self.generate(&self.config.model, &body).await?;
        response
            .text()
            .map(|text| text.trim().to_string())
            .ok_or_else(|| GatewayError::upstream(format!("{} returned no answer", SERVICE)))
    }

    async fn speak(&self, text: &str) -> Result<SpeechOutput> {
        let body = GenerateContentRequest {
            contents: vec![Content::with_role("user", speech_prompt(text))],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["AUDIO".to_string()]),
                speech_config: Some(SpeechConfig::voice(self.config.voice.clone())),
                ..GenerationConfig::default()
            }),
            tools: None,
        };

        let response = self.generate(&self.config.tts_model, &body).await?;
        let audio = response
            .inline_data()
            .ok_or_else(|| GatewayError::upstream(format!("{} returned no audio", SERVICE)))?;

        let bytes = BASE64
            .decode(audio.data.as_bytes())
            .map_err(|e| GatewayError::upstream(format!("{} returned invalid audio encoding: {}", SERVICE, e)))?;

        Ok(match pcm_rate(&audio.mime_type) {
            Some(rate) => SpeechOutput::Audio {
                mime_type: "audio/wav".to_string(),
                bytes: wav_from_pcm16(&bytes, rate),
            },
            None => SpeechOutput::Audio {
                mime_type: audio.mime_type.clone(),
                bytes,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_rate_parsing() {
        assert_eq!(pcm_rate("audio/L16;codec=pcm;rate=16000"), Some(16_000));
        assert_eq!(pcm_rate("audio/pcm"), Some(DEFAULT_PCM_RATE));
        assert_eq!(pcm_rate("audio/mpeg"), None);
    }

    #[test]
    fn test_wav_header() {
        let wav = wav_from_pcm16(&[0, 0, 1, 0], 24_000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 48);
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 4);
    }

    #[test]
    fn test_identity_and_endpoint() {
        let backend = HostedBackend::new(HostedConfig {
            api_key: Some("key".to_string()),
            base_url: "http://localhost:1234/v1beta/".to_string(),
            ..HostedConfig::default()
        })
        .unwrap();
        assert_eq!(backend.identity(), "hosted:gemini-2.5-flash");
        assert_eq!(
            backend.endpoint("m"),
            "http://localhost:1234/v1beta/models/m:generateContent"
        );
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let err = HostedBackend::new(HostedConfig::default()).err().unwrap();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }
}
