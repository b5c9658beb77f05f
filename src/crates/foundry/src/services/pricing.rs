//! Per-model token pricing

use crate::config::{BudgetConfig, ModelPrice};
use crate::models::{ModelRef, TokenUsage};
use std::collections::HashMap;
use tracing::debug;

/// Built-in prices in USD per token, keyed by `provider:model`
fn default_pricing() -> Vec<(&'static str, f64, f64)> {
    vec![
        ("openai:gpt-4o", 0.0000025, 0.00001),
        ("openai:gpt-4o-mini", 0.00000015, 0.0000006),
        ("openai:gpt-4-turbo", 0.00001, 0.00003),
        ("openai:gpt-3.5-turbo", 0.0000005, 0.0000015),
        ("anthropic:claude-3-5-sonnet", 0.000003, 0.000015),
        ("anthropic:claude-3-5-haiku", 0.0000008, 0.000004),
        ("openrouter:anthropic/claude-3.5-sonnet", 0.000003, 0.000015),
        ("openrouter:openai/gpt-4o", 0.0000025, 0.00001),
        ("openrouter:deepseek/deepseek-chat", 0.00000014, 0.00000028),
        ("ollama:llama3", 0.0, 0.0),
        ("ollama:mistral", 0.0, 0.0),
    ]
}

/// Converts token usage into dollars
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    prices: HashMap<String, ModelPrice>,
}

impl PricingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in prices only
    pub fn with_defaults() -> Self {
        let prices = default_pricing()
            .into_iter()
            .map(|(model, input, output)| {
                (
                    model.to_string(),
                    ModelPrice {
                        cost_per_input_token: input,
                        cost_per_output_token: output,
                    },
                )
            })
            .collect();
        Self { prices }
    }

    /// Built-in prices overlaid with `[budget.pricing]` entries
    pub fn from_config(config: &BudgetConfig) -> Self {
        let mut table = Self::with_defaults();
        for (model, price) in &config.pricing {
            table.set(model.clone(), *price);
        }
        table
    }

    pub fn set(&mut self, model: impl Into<String>, price: ModelPrice) {
        self.prices.insert(model.into(), price);
    }

    pub fn price(&self, model: &ModelRef) -> Option<&ModelPrice> {
        self.prices.get(&model.to_string())
    }

    /// Cost of `usage` on `model`. Unpriced models cost nothing.
    pub fn cost(&self, model: &ModelRef, usage: &TokenUsage) -> f64 {
        match self.price(model) {
            Some(price) => {
                usage.input_tokens as f64 * price.cost_per_input_token
                    + usage.output_tokens as f64 * price.cost_per_output_token
            }
            None => {
                debug!(model = %model, "No pricing for model, treating as free");
                0.0
            }
        }
    }
}
