use super::prompt::{complete, render_inputs, required_str};
use super::{Agent, AgentContext, AgentOutput};
use crate::error::{FoundryError, Result};
use crate::models::{ModelRef, ProjectState, Stage, StateDelta};
use async_trait::async_trait;
use serde_json::{json, Value};

const SYSTEM: &str = "You are a product architect. Turn the project brief into a concise \
technical specification covering scope, data model, backend API and frontend screens. \
Answer with {\"title\": string, \"specification\": string}.";

/// Turns the brief into a specification
#[derive(Debug, Clone)]
pub struct IdeaAgent {
    context: AgentContext,
}

impl IdeaAgent {
    pub fn new(context: AgentContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Agent for IdeaAgent {
    fn stage(&self) -> Stage {
        Stage::Idea
    }

    async fn execute(&self, snapshot: &ProjectState, model: &ModelRef) -> Result<AgentOutput> {
        if snapshot.brief.trim().is_empty() {
            return Err(FoundryError::Validation("Project brief is empty".to_string()));
        }
        let user = render_inputs(snapshot, Stage::Idea)?;
        let (raw, usage) = complete(&self.context, model, SYSTEM, user).await?;
        let document = validate(&raw)
            .map_err(|reason| FoundryError::malformed(model.to_string(), reason, usage))?;

        Ok(AgentOutput {
            delta: StateDelta::new(Stage::Idea, document).with_metadata("model", model.to_string()),
            usage,
        })
    }
}

fn validate(raw: &Value) -> std::result::Result<Value, String> {
    let title = required_str(raw, "title")?;
    let specification = required_str(raw, "specification")?;
    Ok(json!({ "title": title, "specification": specification }))
}
