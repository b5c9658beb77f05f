//! Model selection per stage
//!
//! Routing is a pure function of configuration: a stage override wins over a
//! task hint, which wins over the default primary. Fallbacks are ordered by
//! their declared priority.

use crate::config::{FallbackModel, ModelsConfig};
use crate::error::Result;
use crate::models::{ModelRef, ModelSelection, Stage};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ModelRouter {
    config: ModelsConfig,
}

impl ModelRouter {
    /// Build a router, rejecting malformed model identifiers up front
    pub fn new(config: ModelsConfig) -> Result<Self> {
        let router = Self { config };
        for stage in Stage::ALL {
            router.select(stage, None)?;
        }
        for hint in router.config.hints.keys() {
            router.select(Stage::Idea, Some(hint))?;
        }
        Ok(router)
    }

    pub fn select(&self, stage: Stage, task_hint: Option<&str>) -> Result<ModelSelection> {
        let overrides = self.config.stages.get(&stage);

        let primary = overrides
            .and_then(|o| o.primary.as_deref())
            .or_else(|| task_hint.and_then(|hint| self.config.hints.get(hint).map(String::as_str)))
            .unwrap_or(&self.config.primary)
            .parse::<ModelRef>()?;

        let declared = overrides
            .and_then(|o| o.fallbacks.as_ref())
            .unwrap_or(&self.config.fallbacks);
        let fallbacks = ordered_fallbacks(declared, &primary)?;

        debug!(
            stage = %stage,
            hint = task_hint.unwrap_or(""),
            primary = %primary,
            fallbacks = fallbacks.len(),
            "Selected models"
        );
        Ok(ModelSelection::new(stage, primary, fallbacks))
    }
}

/// Sort by priority (stable for ties) and drop repeats of earlier models
fn ordered_fallbacks(declared: &[FallbackModel], primary: &ModelRef) -> Result<Vec<ModelRef>> {
    let mut sorted: Vec<&FallbackModel> = declared.iter().collect();
    sorted.sort_by_key(|f| f.priority);

    let mut models: Vec<ModelRef> = Vec::with_capacity(sorted.len());
    for fallback in sorted {
        let model = fallback.model.parse::<ModelRef>()?;
        if &model != primary && !models.contains(&model) {
            models.push(model);
        }
    }
    Ok(models)
}
