//! Run identity for correlating logs and events.

use crate::utils::generate_uuid_v7;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one execution of a stage graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// Time-ordered run id.
    pub run_id: Uuid,
    /// When the run was created.
    pub started_at: DateTime<Utc>,
    /// Optional human label such as a CI job name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Default for RunIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl RunIdentity {
    /// Creates an identity with a fresh run id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: generate_uuid_v7(),
            started_at: Utc::now(),
            label: None,
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique() {
        let a = RunIdentity::new();
        let b = RunIdentity::new().with_label("ci");
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(b.label.as_deref(), Some("ci"));
        assert!(serde_json::to_value(&a).unwrap().get("label").is_none());
    }
}
