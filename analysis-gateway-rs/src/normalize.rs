//! Request normalization and validation
//!
//! Raw caller input is bounded and checked here before anything else sees it.
//! Images are validated in two steps: the data-URL prefix is stripped,
//! whitespace removed, the alphabet checked and the decoded size estimated
//! from the base64 length; only payloads within the size limit are then
//! decoded to confirm they are canonical base64.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

use crate::config::RequestLimits;
use crate::error::{GatewayError, Result};
use crate::report::Report;
use crate::request::{
    AnalyzeRequest, ConversationTurn, FollowUpRequest, NormalizedImage, RawAnalyzeRequest,
    RawFollowUpRequest, RawImage,
};
use crate::util::truncate_chars;

/// Raster formats accepted for analysis
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/webp",
    "image/gif",
    "image/bmp",
];

/// Longest text kept for a single prior conversation turn
pub const MAX_TURN_CHARS: usize = 4_000;

/// Validate and bound a raw analyze request
pub fn normalize_analyze(
    raw: RawAnalyzeRequest,
    limits: &RequestLimits,
    backend_identity: &str,
) -> Result<AnalyzeRequest> {
    let trimmed = raw.log_text.as_deref().unwrap_or("").trim();
    let original_log_chars = trimmed.chars().count();
    let (log_text, log_truncated) = truncate_chars(trimmed, limits.max_log_chars);

    if log_truncated {
        debug!(
            original_chars = original_log_chars,
            max_chars = limits.max_log_chars,
            "Log text truncated"
        );
    }

    let total_images = raw.images.len();
    let dropped_images = total_images.saturating_sub(limits.max_images);
    if dropped_images > 0 {
        debug!(
            received = total_images,
            kept = limits.max_images,
            "Dropping images beyond limit"
        );
    }

    let images = raw
        .images
        .into_iter()
        .take(limits.max_images)
        .enumerate()
        .map(|(index, image)| normalize_image(image, index, limits.max_image_bytes))
        .collect::<Result<Vec<_>>>()?;

    if log_text.is_empty() && images.is_empty() {
        return Err(GatewayError::missing_field(
            "logText (provide log text or at least one image)",
        ));
    }

    Ok(AnalyzeRequest {
        log_text,
        log_truncated,
        original_log_chars,
        images,
        grounding_enabled: raw.grounding_enabled,
        backend_identity: backend_identity.to_string(),
        dropped_images,
    })
}

/// Validate a single image
pub fn normalize_image(raw: RawImage, index: usize, max_bytes: usize) -> Result<NormalizedImage> {
    let (declared_mime, payload) = match raw {
        RawImage::DataUrl(data) => (None, data),
        RawImage::Inline { mime_type, data } => (mime_type, data),
    };

    let (embedded_mime, payload) = split_data_url(&payload);
    let mime_type = declared_mime
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .or(embedded_mime)
        .map(canonical_mime)
        .ok_or_else(|| {
            GatewayError::unsupported_media_type(format!("image {} has no mime type", index))
        })?;

    if !ALLOWED_MIME_TYPES.contains(&mime_type.as_str()) {
        return Err(GatewayError::unsupported_media_type(format!(
            "image {} has type {} (allowed: png, jpeg, jpg, webp, gif, bmp)",
            index, mime_type
        )));
    }

    let data: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    validate_base64(&data).map_err(|reason| {
        GatewayError::invalid_image_encoding(format!("image {}: {}", index, reason))
    })?;

    let image = NormalizedImage { mime_type, data };
    let decoded = image.decoded_len();
    if decoded > max_bytes {
        return Err(GatewayError::payload_too_large(format!(
            "image {} decodes to {} bytes (max {})",
            index, decoded, max_bytes
        )));
    }

    STANDARD.decode(&image.data).map_err(|e| {
        GatewayError::invalid_image_encoding(format!("image {}: {}", index, e))
    })?;

    Ok(image)
}

/// Split `data:<mime>;base64,<payload>` into its mime type and payload
fn split_data_url(value: &str) -> (Option<&str>, &str) {
    let trimmed = value.trim_start();
    let Some(rest) = trimmed
        .get(..5)
        .filter(|scheme| scheme.eq_ignore_ascii_case("data:"))
        .map(|_| &trimmed[5..])
    else {
        return (None, value);
    };

    match rest.split_once(',') {
        Some((header, payload)) => {
            let mime = header.split(';').next().map(str::trim).filter(|m| !m.is_empty());
            (mime, payload)
        }
        None => (None, rest),
    }
}

/// Lowercase a mime type, accepting bare subtypes such as `png`
fn canonical_mime(mime: &str) -> String {
    let lower = mime.trim().to_ascii_lowercase();
    if lower.contains('/') {
        lower
    } else {
        format!("image/{}", lower)
    }
}

/// Check the standard base64 alphabet, padding and length
fn validate_base64(data: &str) -> std::result::Result<(), String> {
    if data.is_empty() {
        return Err("empty image payload".to_string());
    }

    let body = data.trim_end_matches('=');
    let padding = data.len() - body.len();
    if padding > 2 {
        return Err(format!("too much padding ({} '=' characters)", padding));
    }

    if let Some(bad) = body
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '+' || *c == '/'))
    {
        return Err(format!("invalid base64 character {:?}", bad));
    }

    if data.len() % 4 != 0 {
        return Err(format!("base64 length {} is not a multiple of 4", data.len()));
    }

    Ok(())
}

/// Validate and bound a follow-up question
pub fn normalize_follow_up(raw: RawFollowUpRequest, limits: &RequestLimits) -> Result<FollowUpRequest> {
    let question = raw.question.as_deref().unwrap_or("").trim();
    if question.is_empty() {
        return Err(GatewayError::missing_field("question"));
    }
    let (question, _) = truncate_chars(question, limits.max_question_chars);

    if !raw.report.is_object() {
        return Err(GatewayError::missing_field("report"));
    }
    let report = Report::from_value(&raw.report);

    let turns: Vec<ConversationTurn> = raw
        .history
        .into_iter()
        .filter(|turn| !turn.text.trim().is_empty())
        .collect();
    let skip = turns.len().saturating_sub(limits.max_history_turns);
    let history = turns
        .into_iter()
        .skip(skip)
        .map(|turn| ConversationTurn {
            role: turn.role,
            text: truncate_chars(turn.text.trim(), MAX_TURN_CHARS).0,
        })
        .collect();

    Ok(FollowUpRequest {
        report,
        history,
        question,
    })
}

/// Validate and bound text to be spoken
pub fn normalize_speech_text(text: Option<&str>, limits: &RequestLimits) -> Result<String> {
    let text = text.unwrap_or("").trim();
    if text.is_empty() {
        return Err(GatewayError::missing_field("text"));
    }
    let (text, truncated) = truncate_chars(text, limits.max_speech_chars);
    if truncated {
        debug!(max_chars = limits.max_speech_chars, "Speech text truncated");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::request::Role;
    use serde_json::json;

    const PNG_1PX: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    fn raw(log: &str, images: Vec<RawImage>) -> RawAnalyzeRequest {
        RawAnalyzeRequest {
            log_text: Some(log.to_string()),
            images,
            grounding_enabled: false,
        }
    }

    fn inline(mime: &str, data: &str) -> RawImage {
        RawImage::Inline {
            mime_type: Some(mime.to_string()),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_pdf_is_unsupported() {
        let err = normalize_analyze(
            raw("", vec![inline("application/pdf", "aGVsbG8=")]),
            &RequestLimits::default(),
            "demo:stub",
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedMediaType(_)));
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    }

    #[test]
    fn test_data_url_mime_is_extracted() {
        let request = normalize_analyze(
            raw("disk full", vec![RawImage::DataUrl(format!("data:IMAGE/PNG;base64,{}", PNG_1PX))]),
            &RequestLimits::default(),
            "demo:stub",
        )
        .unwrap();
        assert_eq!(request.images()[0].mime_type, "image/png");
        assert_eq!(request.images()[0].data, PNG_1PX);
    }

    #[test]
    fn test_bare_base64_without_mime_is_rejected() {
        let err = normalize_image(RawImage::DataUrl(PNG_1PX.to_string()), 0, 1024).unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedMediaType(_)));
    }

    #[test]
    fn test_whitespace_is_stripped_from_payload() {
        let spaced = format!("{}\n{}", &PNG_1PX[..20], &PNG_1PX[20..]);
        let image = normalize_image(inline("png", &spaced), 0, 1024).unwrap();
        assert_eq!(image.data, PNG_1PX);
        assert_eq!(image.mime_type, "image/png");
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        // "ab==" has the right shape but non-zero trailing bits
        for bad in ["not base64!", "abc", "ab=c", "a===", "ab=="] {
            let err = normalize_image(inline("image/png", bad), 0, 1024).unwrap_err();
            assert!(
                matches!(err, GatewayError::InvalidImageEncoding(_)),
                "{bad} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_oversized_image_is_rejected() {
        // "aGVsbG8=" decodes to 5 bytes
        let err = normalize_image(inline("image/gif", "aGVsbG8="), 0, 4).unwrap_err();
        assert!(matches!(err, GatewayError::PayloadTooLarge(_)));
        assert!(normalize_image(inline("image/gif", "aGVsbG8="), 0, 5).is_ok());
    }

    #[test]
    fn test_log_truncation_is_flagged() {
        let limits = RequestLimits {
            max_log_chars: 5,
            ..RequestLimits::default()
        };
        let request = normalize_analyze(raw("ünïcødé text", vec![]), &limits, "demo:stub").unwrap();
        assert_eq!(request.log_text(), "ünïcø");
        assert!(request.log_truncated());
        assert_eq!(request.original_log_chars(), 12);
    }

    #[test]
    fn test_extra_images_are_dropped() {
        let limits = RequestLimits {
            max_images: 1,
            ..RequestLimits::default()
        };
        // The dropped image is never validated
        let images = vec![inline("image/png", PNG_1PX), inline("application/pdf", "????")];
        let request = normalize_analyze(raw("", images), &limits, "demo:stub").unwrap();
        assert_eq!(request.images().len(), 1);
        assert_eq!(request.dropped_images(), 1);
    }

    #[test]
    fn test_empty_request_is_missing_field() {
        let err = normalize_analyze(raw("   \n ", vec![]), &RequestLimits::default(), "demo:stub")
            .unwrap_err();
        assert!(matches!(err, GatewayError::MissingField(_)));
    }

    #[test]
    fn test_raw_request_deserializes_both_image_shapes() {
        let body = json!({
            "logText": "ERROR timeout",
            "images": [
                format!("data:image/webp;base64,{}", PNG_1PX),
                { "mimeType": "image/jpeg", "data": PNG_1PX }
            ],
            "groundingEnabled": true
        });
        let raw: RawAnalyzeRequest = serde_json::from_value(body).unwrap();
        let request = normalize_analyze(raw, &RequestLimits::default(), "hosted:m").unwrap();
        assert_eq!(request.images().len(), 2);
        assert_eq!(request.images()[1].mime_type, "image/jpeg");
        assert!(request.grounding_enabled());
        assert_eq!(request.backend_identity(), "hosted:m");
    }

    #[test]
    fn test_follow_up_keeps_recent_history() {
        let limits = RequestLimits {
            max_history_turns: 2,
            max_question_chars: 4,
            ..RequestLimits::default()
        };
        let raw = RawFollowUpRequest {
            report: json!({ "title": "Outage" }),
            history: vec![
                ConversationTurn { role: Role::User, text: "one".into() },
                ConversationTurn { role: Role::Assistant, text: "two".into() },
                ConversationTurn { role: Role::User, text: "  ".into() },
                ConversationTurn { role: Role::User, text: "three".into() },
            ],
            question: Some(" why did it fail? ".into()),
        };
        let request = normalize_follow_up(raw, &limits).unwrap();
        assert_eq!(request.question(), "why ");
        let texts: Vec<&str> = request.history().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
        assert_eq!(request.report().title, "Outage");
    }

    #[test]
    fn test_follow_up_requires_question_and_report() {
        let limits = RequestLimits::default();
        let no_question = RawFollowUpRequest {
            report: json!({}),
            ..RawFollowUpRequest::default()
        };
        assert!(matches!(
            normalize_follow_up(no_question, &limits),
            Err(GatewayError::MissingField(_))
        ));

        let no_report = RawFollowUpRequest {
            question: Some("what now?".into()),
            ..RawFollowUpRequest::default()
        };
        assert!(matches!(
            normalize_follow_up(no_report, &limits),
            Err(GatewayError::MissingField(_))
        ));
    }

    #[test]
    fn test_speech_text_is_bounded() {
        let limits = RequestLimits {
            max_speech_chars: 3,
            ..RequestLimits::default()
        };
        assert_eq!(normalize_speech_text(Some("  hello "), &limits).unwrap(), "hel");
        assert!(normalize_speech_text(Some(" "), &limits).is_err());
        assert!(normalize_speech_text(None, &limits).is_err());
    }
}
