use super::{ModelProvider, OpenAiCompatibleProvider};
use crate::config::ProviderConfig;
use crate::error::{FoundryError, Result};
use crate::models::ModelRef;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Maps the provider half of a model id to its client
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ModelProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One OpenAI-compatible client per configured endpoint
    pub fn from_config(providers: &BTreeMap<String, ProviderConfig>) -> Result<Self> {
        let mut registry = Self::new();
        for (name, config) in providers {
            let provider = OpenAiCompatibleProvider::new(name.clone(), config)?;
            registry.register(name.clone(), Arc::new(provider));
        }
        Ok(registry)
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn ModelProvider>) {
        let name = name.into();
        debug!(provider = %name, "Registered model provider");
        self.providers.insert(name, provider);
    }

    /// Provider serving `model`; an unknown provider is a configuration error
    pub fn resolve(&self, model: &ModelRef) -> Result<Arc<dyn ModelProvider>> {
        self.providers.get(&model.provider).cloned().ok_or_else(|| {
            FoundryError::Config(format!(
                "No provider '{}' configured for model {}",
                model.provider, model
            ))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
