use crate::error::FoundryError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One phase of the generation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Idea,
    Backend,
    Frontend,
    Qa,
}

impl Stage {
    /// Stages in pipeline order
    pub const ALL: [Stage; 4] = [Stage::Idea, Stage::Backend, Stage::Frontend, Stage::Qa];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idea => "idea",
            Self::Backend => "backend",
            Self::Frontend => "frontend",
            Self::Qa => "qa",
        }
    }

    /// The stage that follows this one in the fixed order
    pub fn next(&self) -> Option<Stage> {
        match self {
            Self::Idea => Some(Self::Backend),
            Self::Backend => Some(Self::Frontend),
            Self::Frontend => Some(Self::Qa),
            Self::Qa => None,
        }
    }

    /// Stages whose artifacts this stage reads
    pub fn inputs(&self) -> &'static [Stage] {
        match self {
            Self::Idea => &[],
            Self::Backend => &[Stage::Idea],
            Self::Frontend => &[Stage::Idea, Stage::Backend],
            Self::Qa => &[Stage::Idea, Stage::Backend, Stage::Frontend],
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Stage {
    type Err = FoundryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idea" => Ok(Self::Idea),
            "backend" => Ok(Self::Backend),
            "frontend" => Ok(Self::Frontend),
            "qa" => Ok(Self::Qa),
            other => Err(FoundryError::Validation(format!("Unknown stage: {}", other))),
        }
    }
}
