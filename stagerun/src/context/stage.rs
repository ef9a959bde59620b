//! The context handed to a stage body.

use super::{RunEnvironment, RunIdentity};
use crate::config::RunConfig;
use crate::core::StageKind;
use crate::errors::ArtifactError;
use crate::intercept::InterceptionEngine;
use crate::session::{ArtifactStore, AutomationSession, SessionStore};
use std::sync::Arc;

/// What one attempt of one stage can see.
///
/// The session is fresh for every attempt. Other stages are reachable only
/// through the session store and the artifact store.
#[derive(Debug, Clone)]
pub struct StageContext {
    env: RunEnvironment,
    stage_name: String,
    kind: StageKind,
    attempt: u32,
    session: Arc<dyn AutomationSession>,
}

impl StageContext {
    /// Creates a context for `attempt` (1-based) of `stage_name`.
    #[must_use]
    pub fn new(
        env: RunEnvironment,
        stage_name: impl Into<String>,
        kind: StageKind,
        attempt: u32,
        session: Arc<dyn AutomationSession>,
    ) -> Self {
        Self {
            env,
            stage_name: stage_name.into(),
            kind,
            attempt,
            session,
        }
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Returns the stage kind.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Returns the attempt number, starting at 1.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the automation session of this attempt.
    #[must_use]
    pub fn session(&self) -> &Arc<dyn AutomationSession> {
        &self.session
    }

    /// Shortcut for the session's interception engine.
    #[must_use]
    pub fn interceptor(&self) -> &InterceptionEngine {
        self.session.interceptor()
    }

    /// Returns the run configuration.
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        self.env.config()
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        self.env.identity()
    }

    /// Returns the session store.
    #[must_use]
    pub fn session_store(&self) -> &Arc<dyn SessionStore> {
        self.env.session_store()
    }

    /// Returns the artifact store.
    #[must_use]
    pub fn artifacts(&self) -> &ArtifactStore {
        self.env.artifacts()
    }

    /// Reads an artifact, failing if no stage produced it.
    pub async fn require_artifact(&self, key: &str) -> Result<serde_json::Value, ArtifactError> {
        self.env.artifacts().require(key).await
    }

    /// Reads a string artifact, failing if missing or not a string.
    pub async fn require_artifact_str(&self, key: &str) -> Result<String, ArtifactError> {
        self.env.artifacts().require_str(key).await
    }

    /// Returns true once the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.env.cancellation().is_cancelled()
    }

    /// Emits an event tagged with the stage name and attempt.
    pub fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        let mut enriched = data.unwrap_or_else(|| serde_json::json!({}));
        if let serde_json::Value::Object(ref mut map) = enriched {
            map.insert("stage".to_string(), serde_json::json!(&self.stage_name));
            map.insert("attempt".to_string(), serde_json::json!(self.attempt));
        }
        self.env.emit(event_type, Some(enriched));
    }
}
