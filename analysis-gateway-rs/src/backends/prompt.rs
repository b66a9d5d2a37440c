//! Prompt construction shared by the model backends

use crate::report::Report;
use crate::request::{AnalyzeRequest, Role};

pub const ANALYSIS_SYSTEM_PROMPT: &str = "You are a senior site reliability engineer writing an incident post-mortem. \
Analyze the provided logs and screenshots and respond with a single JSON object and nothing else. \
Use exactly these keys: title (string), summary (string), severity (one of critical, high, medium, low), \
rootCauses (array of strings), reasoningTrace (array of short strings describing how you reached the conclusion), \
confidence (integer 0-100), timeline (array of {time, event, tone} where tone is one of neutral, info, warning, critical, success), \
actionItems (array of {title, owner, priority} where priority is one of high, medium, low), \
mitigationSteps (array of strings), impact ({summary, usersAffected, servicesAffected (array), duration}), \
tags (array of short lowercase strings), lessonsLearned (array of strings), preventionRecommendations (array of strings). \
Only state facts supported by the evidence; say so when the evidence is insufficient.";

pub const FOLLOW_UP_SYSTEM_PROMPT: &str = "You are a senior site reliability engineer answering questions about an incident \
report you produced earlier. Answer concisely in plain text, grounded in the report. If the report does not contain the \
answer, say what additional evidence would be needed.";

pub const SPEECH_PREAMBLE: &str = "Read the following incident briefing in a calm, clear, professional voice:";

/// User prompt for an analysis request
pub fn build_analysis_prompt(request: &AnalyzeRequest) -> String {
    let mut prompt = String::with_capacity(request.log_text().len() + 512);

    let image_count = request.images().len();
    if image_count > 0 {
        prompt.push_str(&format!("{} screenshot(s) are attached as evidence.\n", image_count));
    }
    if request.dropped_images() > 0 {
        prompt.push_str(&format!(
            "{} additional screenshot(s) were omitted because of size limits.\n",
            request.dropped_images()
        ));
    }
    if request.log_truncated() {
        prompt.push_str(&format!(
            "NOTE: the logs were truncated to the first {} of {} characters. Do not speculate about the omitted portion.\n",
            request.log_text().chars().count(),
            request.original_log_chars()
        ));
    }
    if request.grounding_enabled() {
        prompt.push_str("Use web search to check known issues for the technologies involved and cite sources.\n");
    }

    if request.log_text().is_empty() {
        prompt.push_str("\nNo log text was provided; analyze the screenshots only.\n");
    } else {
        prompt.push_str("\n<logs>\n");
        prompt.push_str(request.log_text());
        prompt.push_str("\n</logs>\n");
    }

    prompt
}

/// Variant of the analysis prompt for text-only backends
pub fn build_text_only_prompt(request: &AnalyzeRequest) -> String {
    let mut prompt = build_analysis_prompt(request);
    if !request.images().is_empty() {
        prompt.push_str("\nThis model cannot view the attached screenshots; base the analysis on the logs only.\n");
    }
    prompt
}

/// Report serialized for inclusion in a follow-up conversation
pub fn report_context(report: &Report) -> String {
    let json = serde_json::to_string_pretty(report).unwrap_or_else(|_| report.summary.clone());
    format!("Incident report under discussion:\n{}", json)
}

/// Wire role name for a conversation turn
pub fn role_name(role: Role, assistant_name: &'static str) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => assistant_name,
    }
}

/// Text to hand to a speech model
pub fn speech_prompt(text: &str) -> String {
    format!("{}\n\n{}", SPEECH_PREAMBLE, text)
}
