//! Offline demo backend
//!
//! Derives a plausible report from keyword heuristics over the log text. The
//! output is produced as JSON text and parsed by the repair parser, exactly
//! like a real model response, so the whole pipeline is exercised without
//! network access.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use super::{Backend, SpeechOutput};
use crate::error::Result;
use crate::repair::parse_report;
use crate::report::Report;
use crate::request::{AnalyzeRequest, FollowUpRequest};

const IDENTITY: &str = "demo:heuristic-v1";
const MAX_TIMELINE_LINES: usize = 8;

static TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\d{4}-\d{2}-\d{2}[T ])?(\d{2}:\d{2}(?::\d{2})?)").expect("static regex")
});

/// A failure category recognized by keyword
struct Signal {
    tag: &'static str,
    keywords: &'static [&'static str],
    cause: &'static str,
    action: &'static str,
    owner: &'static str,
}

const SIGNALS: &[Signal] = &[
    Signal {
        tag: "database",
        keywords: &["database", "postgres", "mysql", "deadlock", "sql", "connection pool"],
        cause: "Database connectivity or contention degraded dependent services",
        action: "Review database connection pool sizing and slow query logs",
        owner: "Database team",
    },
    Signal {
        tag: "timeout",
        keywords: &["timeout", "timed out", "deadline exceeded", "504"],
        cause: "Upstream calls exceeded their deadlines and cascaded into request failures",
        action: "Audit timeout and retry budgets on the affected call paths",
        owner: "Service owners",
    },
    Signal {
        tag: "memory",
        keywords: &["out of memory", "oom", "heap", "memory"],
        cause: "Memory exhaustion caused process restarts",
        action: "Profile memory usage and set container limits with headroom",
        owner: "Platform team",
    },
    Signal {
        tag: "disk",
        keywords: &["no space left", "disk full", "disk", "inode"],
        cause: "Storage capacity was exhausted on at least one host",
        action: "Add disk usage alerts and log rotation",
        owner: "Infrastructure team",
    },
    Signal {
        tag: "network",
        keywords: &["connection refused", "connection reset", "dns", "unreachable", "econnrefused"],
        cause: "Network connectivity between services was interrupted",
        action: "Check service discovery, DNS and network policy changes",
        owner: "Network team",
    },
    Signal {
        tag: "auth",
        keywords: &["unauthorized", "forbidden", "401", "403", "token expired", "certificate"],
        cause: "Authentication or certificate failures rejected legitimate traffic",
        action: "Verify credential and certificate rotation procedures",
        owner: "Security team",
    },
    Signal {
        tag: "deployment",
        keywords: &["deploy", "rollout", "release", "migration", "version"],
        cause: "A recent change or deployment coincided with the failure",
        action: "Correlate the incident window with the change log and consider rollback",
        owner: "Release manager",
    },
];

/// Deterministic stand-in for a model
#[derive(Debug, Default, Clone)]
pub struct DemoBackend;

impl DemoBackend {
    pub fn new() -> Self {
        Self
    }

    /// Build the model-style JSON text for a request
    fn render(&self, request: &AnalyzeRequest) -> String {
        let logs = request.log_text();
        let lower = logs.to_lowercase();

        let severity = if contains_any(&lower, &["fatal", "panic", "outage", "critical", "data loss"]) {
            "critical"
        } else if contains_any(&lower, &["error", "exception", "failed", "failure"]) {
            "high"
        } else if contains_any(&lower, &["warn", "degraded", "retry"]) {
            "medium"
        } else {
            "low"
        };

        let matched: Vec<&Signal> = SIGNALS
            .iter()
            .filter(|signal| contains_any(&lower, signal.keywords))
            .collect();

        let error_lines = logs
            .lines()
            .filter(|line| {
                let l = line.to_lowercase();
                contains_any(&l, &["error", "fatal", "panic", "exception"])
            })
            .count();

        let title = match matched.first() {
            Some(signal) => format!("{} incident ({} severity)", capitalize(signal.tag), severity),
            None if logs.is_empty() => "Screenshot-only incident review".to_string(),
            None => format!("Unclassified incident ({} severity)", severity),
        };

        let mut summary = format!(
            "Offline heuristic analysis of {} log line(s) with {} error line(s)",
            logs.lines().count(),
            error_lines
        );
        if !request.images().is_empty() {
            summary.push_str(&format!(" and {} screenshot(s) (not inspected)", request.images().len()));
        }
        summary.push('.');
        if request.log_truncated() {
            summary.push_str(" Logs were truncated before analysis.");
        }

        let root_causes: Vec<&str> = if matched.is_empty() {
            vec!["Insufficient evidence to determine a root cause"]
        } else {
            matched.iter().map(|s| s.cause).collect()
        };

        let action_items: Vec<Value> = matched
            .iter()
            .enumerate()
            .map(|(i, s)| {
                json!({
                    "title": s.action,
                    "owner": s.owner,
                    "priority": if i == 0 { "high" } else { "medium" },
                })
            })
            .collect();

        let tags: Vec<&str> = matched.iter().map(|s| s.tag).collect();

        let confidence = if matched.is_empty() { 25 } else { (40 + 10 * matched.len()).min(80) };

        let report = json!({
            "title": title,
            "summary": summary,
            "severity": severity,
            "rootCauses": root_causes,
            "reasoningTrace": [
                format!("Classified severity as {} from log level keywords", severity),
                format!("Matched {} failure signature(s)", matched.len()),
            ],
            "confidence": confidence,
            "timeline": timeline(logs),
            "actionItems": action_items,
            "mitigationSteps": matched.iter().map(|s| s.action).collect::<Vec<_>>(),
            "impact": {
                "summary": format!("{} error event(s) observed in the supplied logs", error_lines),
                "usersAffected": "Unknown",
                "servicesAffected": [],
                "duration": "Unknown",
            },
            "tags": tags,
            "lessonsLearned": [],
            "preventionRecommendations": ["Add alerting on the failure signatures seen in this incident"],
        });

        // Emitted fenced like typical model output
        format!("```json\n{}\n```", report)
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn timeline(logs: &str) -> Vec<Value> {
    logs.lines()
        .filter_map(|line| {
            let time = TIMESTAMP.captures(line)?.get(1)?.as_str().to_string();
            let lower = line.to_lowercase();
            let tone = if contains_any(&lower, &["fatal", "panic", "critical", "error", "exception"]) {
                "critical"
            } else if contains_any(&lower, &["warn"]) {
                "warning"
            } else if contains_any(&lower, &["recovered", "resolved", "healthy"]) {
                "success"
            } else {
                "info"
            };
            Some(json!({ "time": time, "event": line.trim(), "tone": tone }))
        })
        .take(MAX_TIMELINE_LINES)
        .collect()
}

#[async_trait]
impl Backend for DemoBackend {
    fn identity(&self) -> &str {
        IDENTITY
    }

    async fn analyze(&self, request: &AnalyzeRequest) -> Result<Report> {
        parse_report(&self.render(request))
    }

    async fn follow_up(&self, request: &FollowUpRequest) -> Result<String> {
        let report = request.report();
        let cause = report
            .root_causes
            .first()
            .map(String::as_str)
            .unwrap_or("not yet determined");
        Ok(format!(
            "(demo backend) Regarding \"{}\": the incident \"{}\" was rated {} severity. \
             The leading root cause is: {}. Connect a model backend for a detailed answer.",
            request.question(),
            report.title,
            report.severity.as_str(),
            cause
        ))
    }

    async fn speak(&self, _text: &str) -> Result<SpeechOutput> {
        Ok(SpeechOutput::Unsupported {
            reason: "the demo backend has no speech synthesis".to_string(),
        })
    }
}
