use serde::Deserialize;
use serde_json::Value;

use crate::error::{ServiceError, ServiceResult};
use crate::types::NodeInput;

/// Roadmap content produced by a text-generation model, before it is bound
/// to a user.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RoadmapDraft {
    pub interest: String,
    pub nodes: Vec<NodeInput>,
}

impl RoadmapDraft {
    /// Parse model output, tolerating a surrounding ```json fence.
    pub fn from_generated_text(text: &str) -> ServiceResult<Self> {
        let cleaned = strip_code_fence(text);
        let value: Value = serde_json::from_str(cleaned).map_err(|e| {
            ServiceError::InvalidInput(format!("Failed to parse generated roadmap: {e}"))
        })?;

        let interest_ok = value
            .get("interest")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty());
        let nodes_ok = value.get("nodes").is_some_and(Value::is_array);
        if !interest_ok || !nodes_ok {
            return Err(ServiceError::InvalidInput(
                "Invalid generated roadmap structure".into(),
            ));
        }

        serde_json::from_value(value).map_err(|e| {
            ServiceError::InvalidInput(format!("Invalid generated roadmap node: {e}"))
        })
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string (`json`, `JSON`, ...); a one-line fence has no newline after it
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}
