//! Model provider abstraction
//!
//! Providers speak a uniform request/response contract so the engine never
//! depends on a particular vendor API.

mod openai;
mod registry;

pub use openai::OpenAiCompatibleProvider;
pub use registry::ProviderRegistry;

use crate::error::Result;
use crate::models::{ModelRef, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Prompt sent to a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPayload {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl PromptPayload {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: 4096,
            temperature: 0.2,
        }
    }

    pub fn with_limits(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

/// Raw model answer plus the tokens it consumed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub output: String,
    pub usage: TokenUsage,
}

/// A backend able to run chat completions
///
/// Implementations fail with `Provider`, `Timeout` or `MalformedOutput` and
/// never retry on their own.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn invoke(&self, model: &ModelRef, prompt: &PromptPayload) -> Result<ProviderResponse>;

    /// Provider name for logs
    fn name(&self) -> &str;
}
