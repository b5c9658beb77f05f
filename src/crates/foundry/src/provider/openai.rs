//! Client for OpenAI-compatible chat completion APIs
//!
//! Works against OpenAI, OpenRouter, Ollama and LM Studio, which all expose
//! `POST {base_url}/chat/completions`.

use super::{ModelProvider, PromptPayload, ProviderResponse};
use crate::config::ProviderConfig;
use crate::error::{FoundryError, Result};
use crate::models::{ModelRef, TokenUsage};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(name: impl Into<String>, config: &ProviderConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FoundryError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    async fn invoke(&self, model: &ModelRef, prompt: &PromptPayload) -> Result<ProviderResponse> {
        let body = ChatRequest {
            model: &model.model,
            messages: vec![
                ChatMessage { role: "system", content: &prompt.system },
                ChatMessage { role: "user", content: &prompt.user },
            ],
            max_tokens: prompt.max_tokens,
            temperature: prompt.temperature,
        };

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(provider = %self.name, model = %model, "Sending chat completion");
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FoundryError::Timeout {
                    model: model.to_string(),
                    duration_ms: self.timeout.as_millis() as u64,
                }
            } else {
                FoundryError::provider(model.to_string(), e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(FoundryError::provider(model.to_string(), describe_status(status, &text)));
        }

        let raw = response
            .text()
            .await
            .map_err(|e| FoundryError::provider(model.to_string(), e.to_string()))?;
        parse_completion(model, &raw)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn describe_status(status: StatusCode, body: &str) -> String {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            format!("authentication failed ({}): {}", status, body)
        }
        StatusCode::TOO_MANY_REQUESTS => format!("rate limit exceeded: {}", body),
        _ => format!("API error {}: {}", status, body),
    }
}

fn parse_completion(model: &ModelRef, raw: &str) -> Result<ProviderResponse> {
    let parsed: ChatResponse = serde_json::from_str(raw).map_err(|e| {
        FoundryError::malformed(model.to_string(), format!("undecodable response: {}", e), TokenUsage::default())
    })?;

    let usage = parsed
        .usage
        .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();

    let output = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| FoundryError::malformed(model.to_string(), "response contained no choices", usage))?;

    Ok(ProviderResponse { output, usage })
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
