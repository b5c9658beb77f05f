//! Stage agents
//!
//! One agent per pipeline stage. Each reads the committed snapshot, asks a
//! model for a JSON document, and returns a delta targeting its own stage
//! along with the tokens spent. Agents never retry and never touch the
//! budget; every failure propagates to the orchestrator.

mod backend;
mod frontend;
mod idea;
mod prompt;
mod qa;

pub use backend::BackendAgent;
pub use frontend::FrontendAgent;
pub use idea::IdeaAgent;
pub use qa::QaAgent;

use crate::config::ExecutionConfig;
use crate::error::Result;
use crate::models::{ModelRef, ProjectState, Stage, StateDelta, TokenUsage};
use crate::provider::ProviderRegistry;
use async_trait::async_trait;

/// What an agent hands back to the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutput {
    pub delta: StateDelta,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn stage(&self) -> Stage;

    async fn execute(&self, snapshot: &ProjectState, model: &ModelRef) -> Result<AgentOutput>;
}

/// Shared dependencies of every agent
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub providers: ProviderRegistry,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl AgentContext {
    pub fn new(providers: ProviderRegistry, execution: &ExecutionConfig) -> Self {
        Self {
            providers,
            max_tokens: execution.max_tokens,
            temperature: execution.temperature,
        }
    }
}

/// Closed set of agents, dispatched by stage
#[derive(Debug, Clone)]
pub enum StageAgent {
    Idea(IdeaAgent),
    Backend(BackendAgent),
    Frontend(FrontendAgent),
    Qa(QaAgent),
}

impl StageAgent {
    pub fn for_stage(stage: Stage, context: AgentContext) -> Self {
        match stage {
            Stage::Idea => Self::Idea(IdeaAgent::new(context)),
            Stage::Backend => Self::Backend(BackendAgent::new(context)),
            Stage::Frontend => Self::Frontend(FrontendAgent::new(context)),
            Stage::Qa => Self::Qa(QaAgent::new(context)),
        }
    }
}

#[async_trait]
impl Agent for StageAgent {
    fn stage(&self) -> Stage {
        match self {
            Self::Idea(a) => a.stage(),
            Self::Backend(a) => a.stage(),
            Self::Frontend(a) => a.stage(),
            Self::Qa(a) => a.stage(),
        }
    }

    async fn execute(&self, snapshot: &ProjectState, model: &ModelRef) -> Result<AgentOutput> {
        match self {
            Self::Idea(a) => a.execute(snapshot, model).await,
            Self::Backend(a) => a.execute(snapshot, model).await,
            Self::Frontend(a) => a.execute(snapshot, model).await,
            Self::Qa(a) => a.execute(snapshot, model).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned provider for agent unit tests

    use super::*;
    use crate::provider::{ModelProvider, PromptPayload, ProviderResponse};
    use parking_lot::Mutex;
    use std::sync::Arc;

    pub struct Canned {
        pub output: String,
        pub prompts: Mutex<Vec<PromptPayload>>,
    }

    #[async_trait]
    impl ModelProvider for Canned {
        async fn invoke(&self, _model: &ModelRef, prompt: &PromptPayload) -> Result<ProviderResponse> {
            self.prompts.lock().push(prompt.clone());
            Ok(ProviderResponse {
                output: self.output.clone(),
                usage: TokenUsage::new(100, 50),
            })
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    pub fn context(output: &str) -> (AgentContext, Arc<Canned>) {
        let canned = Arc::new(Canned {
            output: output.to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let mut providers = ProviderRegistry::new();
        providers.register("canned", canned.clone());
        let context = AgentContext::new(providers, &ExecutionConfig::default());
        (context, canned)
    }

    pub fn model() -> ModelRef {
        ModelRef::new("canned", "test")
    }
}
