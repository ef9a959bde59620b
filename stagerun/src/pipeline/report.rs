//! Outcome of a run.

use crate::core::{StageKind, StageStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final record of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub name: String,
    /// Stage role.
    pub kind: StageKind,
    /// Terminal status.
    pub status: StageStatus,
    /// Attempts made; zero for skipped stages.
    pub attempts: u32,
    /// Error of the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why the stage was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// The failed stage at the root of a dependency skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    /// Artifact keys persisted by the stage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    /// Wall time across all attempts.
    pub duration_ms: f64,
}

impl StageRecord {
    pub(crate) fn skipped(
        name: impl Into<String>,
        kind: StageKind,
        reason: impl Into<String>,
        blocked_by: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            status: StageStatus::Skipped,
            attempts: 0,
            error: None,
            skip_reason: Some(reason.into()),
            blocked_by,
            artifacts: Vec::new(),
            duration_ms: 0.0,
        }
    }
}

/// Everything a run produced, in completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run id.
    pub run_id: Uuid,
    /// Graph name.
    pub graph: String,
    /// Stage records in the order stages reached a terminal status.
    pub records: Vec<StageRecord>,
    /// Whether the run was cancelled before every stage started.
    pub cancelled: bool,
    /// Total wall time.
    pub duration_ms: f64,
}

impl RunReport {
    /// Returns the record of `name`.
    #[must_use]
    pub fn record(&self, name: &str) -> Option<&StageRecord> {
        self.records.iter().find(|record| record.name == name)
    }

    /// Returns the status of `name`.
    #[must_use]
    pub fn status(&self, name: &str) -> Option<StageStatus> {
        self.record(name).map(|record| record.status)
    }

    /// Stage names in completion order.
    #[must_use]
    pub fn completion_order(&self) -> Vec<&str> {
        self.records.iter().map(|record| record.name.as_str()).collect()
    }

    /// Names of stages with `status`.
    #[must_use]
    pub fn with_status(&self, status: StageStatus) -> Vec<&str> {
        self.records
            .iter()
            .filter(|record| record.status == status)
            .map(|record| record.name.as_str())
            .collect()
    }

    /// Teardowns that failed.
    #[must_use]
    pub fn teardown_failures(&self) -> Vec<&StageRecord> {
        self.records
            .iter()
            .filter(|record| record.kind == StageKind::Teardown && record.status == StageStatus::Failed)
            .collect()
    }

    /// True if nothing failed and the run was not cancelled.
    ///
    /// Skips count only through their failed root cause.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.cancelled && self.with_status(StageStatus::Failed).is_empty()
    }

    /// Process exit code for the run.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.success())
    }

    /// One-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let count = |status| self.with_status(status).len();
        let mut summary = format!(
            "{} passed, {} failed, {} skipped",
            count(StageStatus::Passed),
            count(StageStatus::Failed),
            count(StageStatus::Skipped),
        );
        let teardowns = self.teardown_failures().len();
        if teardowns > 0 {
            summary.push_str(&format!(" ({teardowns} teardown failure(s))"));
        }
        if self.cancelled {
            summary.push_str(" [cancelled]");
        }
        summary
    }
}
