//! Recovery of JSON objects from free-form model output
//!
//! Models wrap JSON in prose and code fences, leave trailing commas, forget to
//! quote keys and put raw newlines inside strings. `repair` tries, in order:
//! the fence-stripped text as is, a string-aware textual repair of it, then
//! every fenced block and balanced `{...}` candidate (raw, then repaired).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::report::Report;

/// Upper bound on extracted candidates tried before giving up
pub const MAX_CANDIDATES: usize = 16;

/// Longest model output, in bytes, the parser will attempt to recover
pub const MAX_REPAIR_INPUT_BYTES: usize = 512 * 1024;

static WHOLE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*```[a-z0-9_+-]*[ \t]*\r?\n?(.*?)\r?\n?\s*```\s*$").expect("static regex")
});
static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```[a-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("static regex"));

/// Parse model output into a JSON object, repairing it if necessary
pub fn repair(raw: &str) -> Result<Value> {
    if raw.len() > MAX_REPAIR_INPUT_BYTES {
        return Err(GatewayError::malformed_output(
            format!(
                "model output of {} bytes exceeds the {} byte repair limit",
                raw.len(),
                MAX_REPAIR_INPUT_BYTES
            ),
            raw,
        ));
    }

    let stripped = strip_code_fences(raw);

    if let Some(value) = parse_object(&stripped) {
        return Ok(value);
    }

    if let Some(value) = parse_object(&repair_text(&stripped)) {
        debug!("Model output parsed after textual repair");
        return Ok(value);
    }

    for candidate in candidates(raw) {
        if let Some(value) = parse_object(&candidate).or_else(|| parse_object(&repair_text(&candidate))) {
            debug!(candidate_chars = candidate.len(), "Model output parsed from extracted candidate");
            return Ok(value);
        }
    }

    Err(GatewayError::malformed_output(
        "no JSON object could be recovered from model output",
        raw,
    ))
}

/// Repair model output and coerce it into a report
pub fn parse_report(raw: &str) -> Result<Report> {
    repair(raw).map(|value| Report::from_value(&value))
}

/// Remove a code fence wrapping the whole text
pub fn strip_code_fences(raw: &str) -> String {
    match WHOLE_FENCE.captures(raw) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).trim().to_string(),
        None => raw.trim().to_string(),
    }
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Fenced blocks first, then balanced-brace spans, capped at `MAX_CANDIDATES`
fn candidates(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = FENCED_BLOCK
        .captures_iter(raw)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|block| !block.is_empty())
        .take(MAX_CANDIDATES)
        .collect();

    for span in balanced_objects(raw) {
        if out.len() >= MAX_CANDIDATES {
            break;
        }
        if !out.iter().any(|c| c == span) {
            out.push(span.to_string());
        }
    }

    out
}

/// Outermost balanced `{...}` spans in one pass, skipping braces inside
/// string literals
///
/// Unclosed braces never produce a span, but balanced objects nested inside
/// them still do.
fn balanced_objects(text: &str) -> Vec<&str> {
    let mut open: Vec<usize> = Vec::new();
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => open.push(i),
            b'}' => {
                let Some(start) = open.pop() else { continue };
                // Spans closed earlier inside this one are no longer outermost
                while spans.last().is_some_and(|&(s, _)| s > start) {
                    spans.pop();
                }
                spans.push((start, i + 1));
            }
            _ => {}
        }
    }

    spans
        .into_iter()
        .take(MAX_CANDIDATES)
        .map(|(start, end)| &text[start..end])
        .collect()
}

/// Apply the string-aware textual repairs
///
/// Outside strings: drop trailing commas before `}`/`]`, quote bare
/// identifier keys and drop control characters. Inside strings: escape raw
/// newlines, carriage returns and tabs, and drop other control characters.
pub fn repair_text(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    // Last significant character emitted outside a string
    let mut last_sig: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            if escaped {
                out.push(c);
                escaped = false;
            } else {
                match c {
                    '\\' => {
                        out.push(c);
                        escaped = true;
                    }
                    '"' => {
                        out.push(c);
                        in_string = false;
                        last_sig = Some('"');
                    }
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    c if c.is_control() => {}
                    c => out.push(c),
                }
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                    last_sig = Some(c);
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '_' | '$' | '-')) {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                let next = chars[i..].iter().find(|ch| !ch.is_whitespace());
                if matches!(last_sig, Some('{') | Some(',')) && next == Some(&':') {
                    out.push('"');
                    out.push_str(&ident);
                    out.push('"');
                    last_sig = Some('"');
                } else {
                    out.push_str(&ident);
                    last_sig = ident.chars().last();
                }
                continue;
            }
            '\n' | '\r' | '\t' | ' ' => out.push(c),
            c if c.is_control() => {}
            c => {
                out.push(c);
                last_sig = Some(c);
            }
        }
        i += 1;
    }

    out
}
