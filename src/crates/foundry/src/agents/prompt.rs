//! Prompt assembly and response parsing shared by all agents

use super::AgentContext;
use crate::error::{FoundryError, Result};
use crate::models::{ModelRef, ProjectState, Stage, TokenUsage};
use crate::provider::PromptPayload;
use serde_json::Value;
use tracing::debug;

pub(super) const JSON_ONLY: &str =
    "Respond with a single JSON object and nothing else. Do not wrap it in prose.";

/// Latest artifact of each input stage, rendered for a prompt.
/// A missing input means the pipeline was driven out of order.
pub(super) fn render_inputs(snapshot: &ProjectState, stage: Stage) -> Result<String> {
    let mut out = format!("Project brief:\n{}\n", snapshot.brief);
    for input in stage.inputs() {
        let artifact = snapshot.latest(*input).ok_or_else(|| {
            FoundryError::Validation(format!(
                "Stage {} requires a committed {} artifact",
                stage, input
            ))
        })?;
        let document = serde_json::to_string_pretty(&artifact.document)?;
        out.push_str(&format!("\n{} artifact (revision {}):\n{}\n", input, artifact.revision, document));
    }
    Ok(out)
}

/// Send the prompt and pull one JSON object out of the answer
pub(super) async fn complete(
    context: &AgentContext,
    model: &ModelRef,
    system: &str,
    user: String,
) -> Result<(Value, TokenUsage)> {
    let provider = context.providers.resolve(model)?;
    let payload = PromptPayload::new(format!("{}\n\n{}", system, JSON_ONLY), user)
        .with_limits(context.max_tokens, context.temperature);

    let response = provider.invoke(model, &payload).await?;
    debug!(
        model = %model,
        input_tokens = response.usage.input_tokens,
        output_tokens = response.usage.output_tokens,
        "Model responded"
    );

    match extract_json(&response.output) {
        Some(value) => Ok((value, response.usage)),
        None => Err(FoundryError::malformed(
            model.to_string(),
            "response did not contain a JSON object",
            response.usage,
        )),
    }
}

/// Parse a JSON object, tolerating markdown code fences and stray prose
/// around it
pub(super) fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = strip_fences(raw.trim());
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag on the opening fence
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Non-empty string field
pub(super) fn required_str<'a>(document: &'a Value, field: &str) -> std::result::Result<&'a str, String> {
    match document.get(field).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        Some(_) => Err(format!("field '{}' is empty", field)),
        None => Err(format!("missing string field '{}'", field)),
    }
}
