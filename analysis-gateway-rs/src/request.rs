//! Request types
//!
//! `Raw*` types are what callers send over the wire; they are only ever turned
//! into the normalized types by the `normalize` module, so a backend never
//! sees unvalidated input.

use serde::{Deserialize, Serialize};

use crate::report::Report;

/// An image as received from a caller
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawImage {
    /// `data:<mime>;base64,<payload>` or a bare base64 payload
    DataUrl(String),
    /// `{ "mimeType": "image/png", "data": "<base64 or data URL>" }`
    Inline {
        #[serde(default, alias = "mimeType", alias = "type")]
        mime_type: Option<String>,
        data: String,
    },
}

/// Analyze request body as received from a caller
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnalyzeRequest {
    #[serde(default, alias = "log_text", alias = "logs")]
    pub log_text: Option<String>,

    #[serde(default)]
    pub images: Vec<RawImage>,

    #[serde(default, alias = "grounding", alias = "grounding_enabled", alias = "useSearch")]
    pub grounding_enabled: bool,
}

/// Follow-up request body as received from a caller
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFollowUpRequest {
    /// Previously returned report; coerced like model output
    #[serde(default)]
    pub report: serde_json::Value,

    #[serde(default, alias = "messages")]
    pub history: Vec<ConversationTurn>,

    #[serde(default)]
    pub question: Option<String>,
}

/// Speech request body as received from a caller
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSpeechRequest {
    #[serde(default)]
    pub text: Option<String>,
}

/// A validated image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedImage {
    /// Lowercased, allowlisted mime type
    pub mime_type: String,
    /// Validated base64 payload without whitespace or data-URL prefix
    pub data: String,
}

impl NormalizedImage {
    /// Size of the payload once decoded, computed from the base64 length
    pub fn decoded_len(&self) -> usize {
        let padding = self.data.chars().rev().take_while(|c| *c == '=').count();
        (self.data.len() / 4 * 3).saturating_sub(padding)
    }
}

/// A validated, bounded analyze request
///
/// Built only by `normalize::normalize_analyze`; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeRequest {
    pub(crate) log_text: String,
    pub(crate) log_truncated: bool,
    pub(crate) original_log_chars: usize,
    pub(crate) images: Vec<NormalizedImage>,
    pub(crate) grounding_enabled: bool,
    pub(crate) backend_identity: String,
    pub(crate) dropped_images: usize,
}

impl AnalyzeRequest {
    pub fn log_text(&self) -> &str {
        &self.log_text
    }

    pub fn log_truncated(&self) -> bool {
        self.log_truncated
    }

    /// Character count before truncation
    pub fn original_log_chars(&self) -> usize {
        self.original_log_chars
    }

    pub fn images(&self) -> &[NormalizedImage] {
        &self.images
    }

    pub fn grounding_enabled(&self) -> bool {
        self.grounding_enabled
    }

    pub fn backend_identity(&self) -> &str {
        &self.backend_identity
    }

    /// Images discarded because the request exceeded the image limit
    pub fn dropped_images(&self) -> usize {
        self.dropped_images
    }
}

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "model", alias = "ai")]
    Assistant,
}

/// One prior exchange in a follow-up conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    #[serde(alias = "content")]
    pub text: String,
}

/// A validated follow-up question about a report
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUpRequest {
    pub(crate) report: Report,
    pub(crate) history: Vec<ConversationTurn>,
    pub(crate) question: String,
}

impl FollowUpRequest {
    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn question(&self) -> &str {
        &self.question
    }
}
