//! Structured incident report
//!
//! Model output is loosely shaped: keys arrive in camelCase or snake_case,
//! enums in any case, confidence as a fraction or a percentage. `Report::from_value`
//! accepts all of that and produces a report with every field defaulted and
//! clamped, so nothing downstream has to re-check it.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::util::truncate_string;

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_TEXT_CHARS: usize = 4_000;
pub const MAX_ITEM_CHARS: usize = 1_000;
pub const MAX_SHORT_CHARS: usize = 120;
pub const MAX_LIST_ITEMS: usize = 20;
pub const MAX_TIMELINE_EVENTS: usize = 50;
pub const MAX_TAGS: usize = 12;
pub const DEFAULT_TITLE: &str = "Incident analysis";
pub const DEFAULT_CONFIDENCE: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Severity {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "critical" | "sev0" | "sev1" | "p0" => Some(Severity::Critical),
            "high" | "sev2" | "p1" => Some(Severity::High),
            "medium" | "moderate" | "sev3" | "p2" => Some(Severity::Medium),
            "low" | "minor" | "sev4" | "p3" => Some(Severity::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "high" | "urgent" | "critical" | "p0" | "p1" => Some(Priority::High),
            "medium" | "normal" | "p2" => Some(Priority::Medium),
            "low" | "p3" => Some(Priority::Low),
            _ => None,
        }
    }
}

/// Visual tone of a timeline event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Neutral,
    Info,
    Warning,
    Critical,
    Success,
}

impl Tone {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "neutral" => Some(Tone::Neutral),
            "info" => Some(Tone::Info),
            "warning" | "warn" => Some(Tone::Warning),
            "critical" | "error" => Some(Tone::Critical),
            "success" | "resolved" => Some(Tone::Success),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    pub time: String,
    pub event: String,
    pub tone: Tone,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionItem {
    pub title: String,
    pub owner: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Impact {
    pub summary: String,
    pub users_affected: String,
    pub services_affected: Vec<String>,
    pub duration: String,
}

/// Source consulted by a grounded analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub title: String,
    pub summary: String,
    pub severity: Severity,
    pub root_causes: Vec<String>,
    pub reasoning_trace: Vec<String>,
    /// 0 to 100
    pub confidence: u8,
    pub timeline: Vec<TimelineEvent>,
    pub action_items: Vec<ActionItem>,
    pub mitigation_steps: Vec<String>,
    pub impact: Impact,
    pub tags: Vec<String>,
    pub lessons_learned: Vec<String>,
    pub prevention_recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
}

impl Default for Report {
    fn default() -> Self {
        Report::from_value(&Value::Null)
    }
}

impl Report {
    /// Coerce arbitrary JSON into a fully populated report
    pub fn from_value(value: &Value) -> Report {
        let empty = Map::new();
        let obj = value.as_object().unwrap_or(&empty);

        let title = text_field(obj, &["title", "incidentTitle", "incident_title"], MAX_TITLE_CHARS)
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());

        Report {
            title,
            summary: text_field(obj, &["summary", "executiveSummary", "executive_summary"], MAX_TEXT_CHARS)
                .unwrap_or_default(),
            severity: text_field(obj, &["severity"], MAX_SHORT_CHARS)
                .and_then(|s| Severity::parse(&s))
                .unwrap_or_default(),
            root_causes: string_list(field(obj, &["rootCauses", "root_causes", "rootCause", "root_cause"])),
            reasoning_trace: string_list(field(obj, &["reasoningTrace", "reasoning_trace", "reasoning"])),
            confidence: confidence(field(obj, &["confidence", "confidenceScore", "confidence_score"])),
            timeline: timeline(field(obj, &["timeline"])),
            action_items: action_items(field(obj, &["actionItems", "action_items"])),
            mitigation_steps: string_list(field(obj, &["mitigationSteps", "mitigation_steps", "mitigation"])),
            impact: impact(field(obj, &["impact"])),
            tags: tags(field(obj, &["tags"])),
            lessons_learned: string_list(field(obj, &["lessonsLearned", "lessons_learned"])),
            prevention_recommendations: string_list(field(
                obj,
                &["preventionRecommendations", "prevention_recommendations", "prevention"],
            )),
            references: references(field(obj, &["references", "sources"])),
        }
    }

    /// Append grounding references not already present, keeping the list bounded
    pub fn merge_references(&mut self, extra: impl IntoIterator<Item = Reference>) {
        for reference in extra {
            if self.references.len() >= MAX_LIST_ITEMS {
                break;
            }
            if !self.references.iter().any(|r| r.url == reference.url) {
                self.references.push(reference);
            }
        }
    }
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| !value.is_null())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
    .filter(|s| !s.is_empty())
}

fn text_field(obj: &Map<String, Value>, keys: &[&str], max_chars: usize) -> Option<String> {
    field(obj, keys)
        .and_then(scalar_text)
        .map(|s| truncate_string(&s, max_chars))
}

/// Text of a list item that may be a bare string or a small object
fn item_text(value: &Value) -> Option<String> {
    scalar_text(value).or_else(|| {
        let obj = value.as_object()?;
        ["text", "description", "title", "step", "cause", "detail"]
            .iter()
            .filter_map(|key| obj.get(*key))
            .find_map(scalar_text)
    })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(item_text)
            .take(MAX_LIST_ITEMS)
            .map(|s| truncate_string(&s, MAX_ITEM_CHARS))
            .collect(),
        Some(other) => item_text(other)
            .map(|s| vec![truncate_string(&s, MAX_ITEM_CHARS)])
            .unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Fractions in `(0, 1)` are scaled to percent. Exactly one counts as a
/// fraction only when written as a decimal (`1.0`); an integer `1` is 1%.
fn confidence(value: Option<&Value>) -> u8 {
    let (raw, decimal) = match value {
        Some(Value::Number(n)) => (n.as_f64(), n.is_f64()),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            let percent_sign = trimmed.ends_with('%');
            let number = trimmed.trim_end_matches('%').trim();
            (number.parse::<f64>().ok(), !percent_sign && number.contains('.'))
        }
        _ => (None, false),
    };

    match raw {
        Some(x) if x.is_finite() => {
            let fraction = x > 0.0 && (x < 1.0 || (x == 1.0 && decimal));
            let percent = if fraction { x * 100.0 } else { x };
            percent.round().clamp(0.0, 100.0) as u8
        }
        _ => DEFAULT_CONFIDENCE,
    }
}

fn timeline(value: Option<&Value>) -> Vec<TimelineEvent> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(obj) => {
                let event = text_field(obj, &["event", "description", "title", "text"], MAX_ITEM_CHARS)?;
                Some(TimelineEvent {
                    time: text_field(obj, &["time", "timestamp", "at"], MAX_SHORT_CHARS).unwrap_or_default(),
                    event,
                    tone: text_field(obj, &["tone", "type", "level"], MAX_SHORT_CHARS)
                        .and_then(|t| Tone::parse(&t))
                        .unwrap_or_default(),
                })
            }
            other => scalar_text(other).map(|event| TimelineEvent {
                time: String::new(),
                event: truncate_string(&event, MAX_ITEM_CHARS),
                tone: Tone::Neutral,
            }),
        })
        .take(MAX_TIMELINE_EVENTS)
        .collect()
}

fn action_items(value: Option<&Value>) -> Vec<ActionItem> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let (title, owner, priority) = match item {
                Value::Object(obj) => (
                    text_field(obj, &["title", "task", "action", "description"], MAX_ITEM_CHARS)?,
                    text_field(obj, &["owner", "assignee", "team"], MAX_SHORT_CHARS),
                    text_field(obj, &["priority"], MAX_SHORT_CHARS).and_then(|p| Priority::parse(&p)),
                ),
                other => (truncate_string(&scalar_text(other)?, MAX_ITEM_CHARS), None, None),
            };
            Some(ActionItem {
                title,
                owner: owner.unwrap_or_else(|| "Unassigned".to_string()),
                priority: priority.unwrap_or_default(),
            })
        })
        .take(MAX_LIST_ITEMS)
        .collect()
}

fn impact(value: Option<&Value>) -> Impact {
    match value {
        Some(Value::Object(obj)) => Impact {
            summary: text_field(obj, &["summary", "description"], MAX_TEXT_CHARS).unwrap_or_default(),
            users_affected: text_field(obj, &["usersAffected", "users_affected", "users"], MAX_SHORT_CHARS)
                .unwrap_or_default(),
            services_affected: string_list(field(obj, &["servicesAffected", "services_affected", "services"])),
            duration: text_field(obj, &["duration"], MAX_SHORT_CHARS).unwrap_or_default(),
        },
        Some(other) => Impact {
            summary: scalar_text(other)
                .map(|s| truncate_string(&s, MAX_TEXT_CHARS))
                .unwrap_or_default(),
            ..Impact::default()
        },
        None => Impact::default(),
    }
}

fn tags(value: Option<&Value>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in string_list(value) {
        let tag = truncate_string(&tag.to_lowercase(), 40);
        if !out.contains(&tag) {
            out.push(tag);
        }
        if out.len() == MAX_TAGS {
            break;
        }
    }
    out
}

fn references(value: Option<&Value>) -> Vec<Reference> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    let mut out: Vec<Reference> = Vec::new();
    for item in items {
        let (title, url) = match item {
            Value::Object(obj) => (
                text_field(obj, &["title", "name"], MAX_TITLE_CHARS),
                text_field(obj, &["url", "uri", "link"], MAX_ITEM_CHARS),
            ),
            Value::String(s) => (None, Some(s.trim().to_string())),
            _ => (None, None),
        };
        let Some(url) = url.filter(|u| u.starts_with("http://") || u.starts_with("https://")) else {
            continue;
        };
        if out.iter().any(|r| r.url == url) {
            continue;
        }
        out.push(Reference {
            title: title.unwrap_or_else(|| url.clone()),
            url,
        });
        if out.len() == MAX_LIST_ITEMS {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn test_empty_value_gets_defaults() {
        let report = Report::from_value(&json!({}));
        assert_eq!(report.title, DEFAULT_TITLE);
        assert_eq!(report.severity, Severity::Medium);
        assert_eq!(report.confidence, DEFAULT_CONFIDENCE);
        assert!(report.timeline.is_empty());
        assert!(report.references.is_empty());
    }

    #[test]
    fn test_snake_and_camel_keys() {
        let camel = Report::from_value(&json!({ "rootCauses": ["disk"], "actionItems": [{"title": "grow"}] }));
        let snake = Report::from_value(&json!({ "root_causes": ["disk"], "action_items": [{"title": "grow"}] }));
        assert_eq!(camel, snake);
        assert_eq!(camel.action_items[0].owner, "Unassigned");
        assert_eq!(camel.action_items[0].priority, Priority::Medium);
    }

    #[test_case(json!(0.85), 85 ; "fraction")]
    #[test_case(json!(1), 1 ; "integer one is a percent")]
    #[test_case(json!(1.0), 100 ; "decimal one is a fraction")]
    #[test_case(json!("0.5"), 50 ; "string fraction")]
    #[test_case(json!("1%"), 1 ; "string one percent")]
    #[test_case(json!(72), 72 ; "percent")]
    #[test_case(json!("64%"), 64 ; "string percent")]
    #[test_case(json!(250), 100 ; "clamped high")]
    #[test_case(json!(-3), 0 ; "clamped low")]
    #[test_case(json!("high"), DEFAULT_CONFIDENCE ; "garbage")]
    fn test_confidence_coercion(value: Value, expected: u8) {
        let report = Report::from_value(&json!({ "confidence": value }));
        assert_eq!(report.confidence, expected);
    }

    #[test]
    fn test_enums_are_case_insensitive_with_defaults() {
        let report = Report::from_value(&json!({
            "severity": "CRITICAL",
            "timeline": [
                {"time": "10:00", "event": "Alert fired", "tone": "Warning"},
                {"time": "10:05", "event": "Paged", "tone": "purple"},
                {"time": "10:06"}
            ],
            "action_items": [{"title": "Add alert", "priority": "URGENT", "owner": "SRE"}]
        }));
        assert_eq!(report.severity, Severity::Critical);
        assert_eq!(report.timeline.len(), 2);
        assert_eq!(report.timeline[0].tone, Tone::Warning);
        assert_eq!(report.timeline[1].tone, Tone::Neutral);
        assert_eq!(report.action_items[0].priority, Priority::High);
    }

    #[test]
    fn test_lists_and_text_are_bounded() {
        let long = "x".repeat(MAX_TITLE_CHARS * 2);
        let many: Vec<String> = (0..100).map(|i| format!("cause {i}")).collect();
        let report = Report::from_value(&json!({ "title": long, "rootCauses": many, "tags": ["DB", "db", "Network"] }));
        assert_eq!(report.title.chars().count(), MAX_TITLE_CHARS);
        assert_eq!(report.root_causes.len(), MAX_LIST_ITEMS);
        assert_eq!(report.tags, vec!["db", "network"]);
    }

    #[test]
    fn test_references_require_http_urls() {
        let report = Report::from_value(&json!({
            "references": [
                {"title": "Docs", "url": "https://example.com/a"},
                {"title": "Dup", "url": "https://example.com/a"},
                "ftp://nope",
                "http://example.org"
            ]
        }));
        assert_eq!(report.references.len(), 2);
        assert_eq!(report.references[1].title, "http://example.org");
    }

    #[test]
    fn test_serializes_camel_case() {
        let value = serde_json::to_value(Report::default()).unwrap();
        assert!(value.get("rootCauses").is_some());
        assert!(value.get("actionItems").is_some());
        assert_eq!(value["severity"], "medium");
        assert!(value.get("references").is_none());
    }
}
