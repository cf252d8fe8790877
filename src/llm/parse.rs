//! Extract an `AgentResponse` from raw model text.
//!
//! Models wrap JSON in code fences or surround it with prose, so parsing tries the
//! fence-stripped text first and then the outermost `{...}` span.

use serde_json::Value;

use super::{AgentResponse, LlmError, ProposedAction};
use crate::util::preview;

fn strip_code_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text.trim();
    while let Some(idx) = rest.find("```") {
        out.push_str(&rest[..idx]);
        rest = &rest[idx + 3..];
        rest = rest.strip_prefix("json").unwrap_or(rest).trim_start();
    }
    out.push_str(rest);
    out
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn parse_json_object(raw: &str) -> Result<serde_json::Map<String, Value>, LlmError> {
    let cleaned = strip_code_fences(raw);

    let parsed = match serde_json::from_str::<Value>(cleaned.trim()) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Initial JSON parse failed: {}", e);
            outermost_object(&cleaned).and_then(|span| serde_json::from_str(span).ok())
        }
    };

    match parsed {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(LlmError::parse_error(format!(
            "Expected a JSON object, got: {}",
            preview(raw, 500)
        ))),
        None => Err(LlmError::parse_error(format!(
            "Failed to parse model response as JSON: {}",
            preview(raw, 500)
        ))),
    }
}

/// Parse raw model output into reasoning and actions.
///
/// Entries without a tool name are dropped; a missing `params` becomes `{}`.
pub fn parse_agent_response(raw: &str) -> Result<AgentResponse, LlmError> {
    let object = parse_json_object(raw)?;

    let reasoning = object
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(String::from);

    let entries = object
        .get("actions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut actions = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(tool) = entry.get("tool").and_then(Value::as_str) else {
            tracing::warn!("Dropping action without a tool name: {}", entry);
            continue;
        };
        let params = match entry.get("params") {
            Some(Value::Null) | None => Value::Object(Default::default()),
            Some(params) => params.clone(),
        };
        actions.push(ProposedAction::new(tool, params));
    }

    Ok(AgentResponse {
        reasoning,
        actions,
        raw: raw.to_string(),
    })
}
