use super::prompt::{complete, render_inputs};
use super::{Agent, AgentContext, AgentOutput};
use crate::error::{FoundryError, Result};
use crate::models::{ModelRef, ProjectState, QaVerdict, Stage, StateDelta};
use async_trait::async_trait;
use serde_json::Value;

const SYSTEM: &str = "You are a QA reviewer. Check the backend and frontend against the \
specification and report defects. Answer with {\"verdict\": \"pass\" | \"fail\", \
\"findings\": [string]}.";

/// Evaluates the generated product. Produces a verdict, never product code.
#[derive(Debug, Clone)]
pub struct QaAgent {
    context: AgentContext,
}

impl QaAgent {
    pub fn new(context: AgentContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Agent for QaAgent {
    fn stage(&self) -> Stage {
        Stage::Qa
    }

    async fn execute(&self, snapshot: &ProjectState, model: &ModelRef) -> Result<AgentOutput> {
        let user = render_inputs(snapshot, Stage::Qa)?;
        let (raw, usage) = complete(&self.context, model, SYSTEM, user).await?;
        let verdict = parse_verdict(&raw)
            .map_err(|reason| FoundryError::malformed(model.to_string(), reason, usage))?;

        let delta = StateDelta::new(Stage::Qa, verdict.to_document())
            .with_metadata("model", model.to_string())
            .with_metadata("verdict", if verdict.passed { "pass" } else { "fail" });
        Ok(AgentOutput { delta, usage })
    }
}

fn parse_verdict(raw: &Value) -> std::result::Result<QaVerdict, String> {
    let passed = match raw.get("verdict").and_then(Value::as_str) {
        Some(v) if v.eq_ignore_ascii_case("pass") => true,
        Some(v) if v.eq_ignore_ascii_case("fail") => false,
        Some(v) => return Err(format!("unknown verdict '{}'", v)),
        None => return Err("missing string field 'verdict'".to_string()),
    };
    let findings = match raw.get("findings") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| "'findings' must contain only strings".to_string())?,
        Some(_) => return Err("'findings' must be an array".to_string()),
    };
    Ok(QaVerdict { passed, findings })
}
