//! Stage status and kind enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role a stage plays in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// An ordinary test stage.
    #[default]
    Ordinary,
    /// A stage that prepares state (login, seeded data) for its dependents.
    Setup,
    /// A stage that cleans up after a paired setup stage.
    Teardown,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ordinary => write!(f, "ordinary"),
            Self::Setup => write!(f, "setup"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

/// The execution status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not started yet.
    #[default]
    Pending,
    /// Stage is currently running.
    Running,
    /// Stage completed successfully.
    Passed,
    /// Stage ran and failed.
    Failed,
    /// Stage never ran because a prerequisite did not pass or the run was cancelled.
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Skipped)
    }

    /// Returns true if the stage passed.
    #[must_use]
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(StageKind::Ordinary.to_string(), "ordinary");
        assert_eq!(StageKind::Setup.to_string(), "setup");
        assert_eq!(StageKind::Teardown.to_string(), "teardown");
    }

    #[test]
    fn test_stage_status_is_terminal() {
        assert!(StageStatus::Passed.is_terminal());
        assert!(StageStatus::Skipped.is_terminal());
        assert!(StageStatus::Failed.is_terminal());
        assert!(!StageStatus::Pending.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
    }

    #[test]
    fn test_stage_status_serialize() {
        let json = serde_json::to_string(&StageStatus::Skipped).unwrap();
        assert_eq!(json, r#""skipped""#);

        let deserialized: StageStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, StageStatus::Skipped);
    }
}
