use super::backend::validate_modules;
use super::prompt::{complete, render_inputs};
use super::{Agent, AgentContext, AgentOutput};
use crate::error::{FoundryError, Result};
use crate::models::{ModelRef, ProjectState, Stage, StateDelta};
use async_trait::async_trait;

const SYSTEM: &str = "You are a senior frontend engineer. Build the user interface for the \
specification against the backend modules provided. Answer with {\"summary\": string, \
\"modules\": [{\"path\": string, \"content\": string}]}.";

/// Produces frontend modules from the specification and backend
#[derive(Debug, Clone)]
pub struct FrontendAgent {
    context: AgentContext,
}

impl FrontendAgent {
    pub fn new(context: AgentContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Agent for FrontendAgent {
    fn stage(&self) -> Stage {
        Stage::Frontend
    }

    async fn execute(&self, snapshot: &ProjectState, model: &ModelRef) -> Result<AgentOutput> {
        let user = render_inputs(snapshot, Stage::Frontend)?;
        let (raw, usage) = complete(&self.context, model, SYSTEM, user).await?;
        let document = validate_modules(&raw)
            .map_err(|reason| FoundryError::malformed(model.to_string(), reason, usage))?;

        Ok(AgentOutput {
            delta: StateDelta::new(Stage::Frontend, document).with_metadata("model", model.to_string()),
            usage,
        })
    }
}
