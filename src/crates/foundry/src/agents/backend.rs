use super::prompt::{complete, render_inputs, required_str};
use super::{Agent, AgentContext, AgentOutput};
use crate::error::{FoundryError, Result};
use crate::models::{ModelRef, ProjectState, Stage, StateDelta};
use async_trait::async_trait;
use serde_json::{json, Value};

const SYSTEM: &str = "You are a senior backend engineer. Implement the backend described by \
the specification. Answer with {\"summary\": string, \"modules\": [{\"path\": string, \
\"content\": string}]}.";

const REPAIR: &str = "A previous QA review rejected the current implementation. Address \
every finding listed below.";

/// Produces backend modules from the specification
#[derive(Debug, Clone)]
pub struct BackendAgent {
    context: AgentContext,
}

impl BackendAgent {
    pub fn new(context: AgentContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Agent for BackendAgent {
    fn stage(&self) -> Stage {
        Stage::Backend
    }

    async fn execute(&self, snapshot: &ProjectState, model: &ModelRef) -> Result<AgentOutput> {
        let mut user = render_inputs(snapshot, Stage::Backend)?;
        if let Some(verdict) = snapshot.qa_verdict().filter(|v| !v.passed) {
            user.push_str(&format!("\n{}\n", REPAIR));
            for finding in &verdict.findings {
                user.push_str(&format!("- {}\n", finding));
            }
            if let Some(current) = snapshot.latest(Stage::Backend) {
                user.push_str(&format!(
                    "\nCurrent backend (revision {}):\n{}\n",
                    current.revision,
                    serde_json::to_string_pretty(&current.document)?
                ));
            }
        }

        let (raw, usage) = complete(&self.context, model, SYSTEM, user).await?;
        let document = validate_modules(&raw)
            .map_err(|reason| FoundryError::malformed(model.to_string(), reason, usage))?;

        Ok(AgentOutput {
            delta: StateDelta::new(Stage::Backend, document).with_metadata("model", model.to_string()),
            usage,
        })
    }
}

/// Code artifact schema shared with the frontend stage
pub(super) fn validate_modules(raw: &Value) -> std::result::Result<Value, String> {
    let summary = required_str(raw, "summary")?;
    let modules = raw
        .get("modules")
        .and_then(Value::as_array)
        .ok_or_else(|| "missing array field 'modules'".to_string())?;
    if modules.is_empty() {
        return Err("'modules' is empty".to_string());
    }

    let mut clean = Vec::with_capacity(modules.len());
    for (i, module) in modules.iter().enumerate() {
        let path = required_str(module, "path").map_err(|e| format!("modules[{}]: {}", i, e))?;
        let content = module
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("modules[{}]: missing string field 'content'", i))?;
        clean.push(json!({ "path": path, "content": content }));
    }
    Ok(json!({ "summary": summary, "modules": clean }))
}
