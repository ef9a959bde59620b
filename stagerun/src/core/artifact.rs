//! Stage artifact type for values handed from producers to consumers.

use serde::{Deserialize, Serialize};

/// A value produced by one stage and consumed by its dependents or teardown.
///
/// Artifacts are persisted out of process, so the producer is recorded
/// alongside the value to enforce a single producer per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageArtifact {
    /// The artifact key (e.g. `slugId`).
    pub key: String,

    /// The artifact value.
    pub value: serde_json::Value,

    /// Name of the stage that produced the artifact.
    pub producer: String,

    /// When the artifact was written (ISO 8601).
    pub created_at: String,
}

impl StageArtifact {
    /// Creates a new stage artifact stamped with the current time.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        value: serde_json::Value,
        producer: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            producer: producer.into(),
            created_at: crate::utils::iso_timestamp(),
        }
    }

    /// Returns the value as a string slice, if it is a JSON string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}
