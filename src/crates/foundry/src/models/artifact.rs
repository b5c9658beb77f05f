use crate::error::{FoundryError, Result};
use crate::models::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Proposed change to project state from one agent invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    /// Slot the delta writes to
    pub stage: Stage,

    /// Free-form structured document
    pub document: Value,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl StateDelta {
    pub fn new(stage: Stage, document: Value) -> Self {
        Self {
            stage,
            document,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// A delta is well-formed when it carries content and targets `stage` only
    pub fn validate_for(&self, stage: Stage) -> Result<()> {
        if self.stage != stage {
            return Err(FoundryError::Validation(format!(
                "Delta targets '{}' but the current stage is '{}'",
                self.stage, stage
            )));
        }
        if is_empty_document(&self.document) {
            return Err(FoundryError::Validation(format!(
                "Delta for stage '{}' is empty",
                stage
            )));
        }
        Ok(())
    }
}

fn is_empty_document(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Committed output of a stage. Immutable once part of a state version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub stage: Stage,

    /// Revision within the stage slot, starting at 1
    pub revision: u32,

    /// State version that introduced this artifact
    pub version: u64,

    pub document: Value,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    pub committed_at: DateTime<Utc>,
}

impl Artifact {
    pub fn from_delta(delta: StateDelta, revision: u32, version: u64) -> Self {
        Self {
            stage: delta.stage,
            revision,
            version,
            document: delta.document,
            metadata: delta.metadata,
            committed_at: Utc::now(),
        }
    }
}

/// Evaluation record produced by the QA stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaVerdict {
    pub passed: bool,
    pub findings: Vec<String>,
}

impl QaVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            findings: Vec::new(),
        }
    }

    pub fn fail(findings: Vec<String>) -> Self {
        Self {
            passed: false,
            findings,
        }
    }

    pub fn to_document(&self) -> Value {
        json!({
            "verdict": if self.passed { "pass" } else { "fail" },
            "findings": self.findings,
        })
    }

    /// Read a verdict back out of a committed QA document
    pub fn from_document(document: &Value) -> Option<Self> {
        let passed = match document.get("verdict")?.as_str()? {
            "pass" => true,
            "fail" => false,
            _ => return None,
        };
        let findings = document
            .get("findings")
            .and_then(|f| f.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Some(Self { passed, findings })
    }
}
