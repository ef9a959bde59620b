//! Stage output type with factory methods.

use super::StageStatus;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// The output of a stage body.
///
/// Artifacts attached to a passing output are persisted by the scheduler
/// before any dependent or teardown stage is released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// The status of the stage execution.
    pub status: StageStatus,

    /// Artifacts to persist for dependents, keyed by artifact key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, serde_json::Value>,

    /// Additional metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Error message (for failed executions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Skip reason (for skipped executions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl Default for StageOutput {
    fn default() -> Self {
        Self::passed()
    }
}

impl StageOutput {
    fn with_status(status: StageStatus) -> Self {
        Self {
            status,
            artifacts: BTreeMap::new(),
            metadata: HashMap::new(),
            error: None,
            skip_reason: None,
        }
    }

    /// Creates a passing output with no artifacts.
    #[must_use]
    pub fn passed() -> Self {
        Self::with_status(StageStatus::Passed)
    }

    /// Creates a passing output carrying a single artifact.
    #[must_use]
    pub fn passed_with(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self::passed().with_artifact(key, value)
    }

    /// Creates a failure output with an error message.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_status(StageStatus::Failed)
        }
    }

    /// Creates a skip output with a reason.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skip_reason: Some(reason.into()),
            ..Self::with_status(StageStatus::Skipped)
        }
    }

    /// Converts an `anyhow` result into an output, keeping the full error chain.
    #[must_use]
    pub fn from_result(result: anyhow::Result<Self>) -> Self {
        result.unwrap_or_else(|err| Self::failed(format!("{err:#}")))
    }

    /// Adds an artifact.
    #[must_use]
    pub fn with_artifact(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.artifacts.insert(key.into(), value);
        self
    }

    /// Adds metadata.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns true if the stage passed.
    #[must_use]
    pub fn is_passed(&self) -> bool {
        self.status == StageStatus::Passed
    }

    /// Returns true if the stage failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == StageStatus::Failed
    }
}
