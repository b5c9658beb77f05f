use crate::error::FoundryError;
use crate::models::Stage;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A provider + model pair, written `provider:model`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

impl FromStr for ModelRef {
    type Err = FoundryError;

    /// Model names may themselves contain `:` (e.g. `ollama:llama3:8b`),
    /// so only the first separator splits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once(':') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Ok(Self::new(provider, model))
            }
            _ => Err(FoundryError::Config(format!(
                "Invalid model identifier '{}', expected provider:model",
                s
            ))),
        }
    }
}

/// Primary model plus ordered fallbacks for one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub stage: Stage,
    pub primary: ModelRef,
    pub fallbacks: Vec<ModelRef>,
}

impl ModelSelection {
    pub fn new(stage: Stage, primary: ModelRef, fallbacks: Vec<ModelRef>) -> Self {
        Self {
            stage,
            primary,
            fallbacks,
        }
    }

    /// Model at a position in the try order (0 = primary)
    pub fn model_at(&self, index: usize) -> Option<&ModelRef> {
        if index == 0 {
            Some(&self.primary)
        } else {
            self.fallbacks.get(index - 1)
        }
    }

    /// Number of candidate models, primary included
    pub fn len(&self) -> usize {
        1 + self.fallbacks.len()
    }

    pub fn candidates(&self) -> impl Iterator<Item = &ModelRef> {
        std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }
}
