//! Run-wide services shared by every stage.

use super::RunIdentity;
use crate::cancellation::CancellationToken;
use crate::config::RunConfig;
use crate::events::{EventSink, NoOpEventSink};
use crate::session::{ArtifactStore, InMemorySessionStore, SessionFactory, SessionStore};
use std::fmt;
use std::sync::Arc;

/// Everything a run needs besides the graph itself.
#[derive(Clone)]
pub struct RunEnvironment {
    identity: RunIdentity,
    config: Arc<RunConfig>,
    sessions: Arc<dyn SessionFactory>,
    session_store: Arc<dyn SessionStore>,
    artifacts: Arc<ArtifactStore>,
    events: Arc<dyn EventSink>,
    cancellation: Arc<CancellationToken>,
}

impl RunEnvironment {
    /// Creates an environment with in-memory stores and no event sink.
    #[must_use]
    pub fn new(config: RunConfig, sessions: Arc<dyn SessionFactory>) -> Self {
        Self {
            identity: RunIdentity::new(),
            config: Arc::new(config),
            sessions,
            session_store: Arc::new(InMemorySessionStore::new()),
            artifacts: Arc::new(ArtifactStore::in_memory()),
            events: Arc::new(NoOpEventSink),
            cancellation: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the session store.
    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = store;
        self
    }

    /// Sets the artifact store.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Arc<ArtifactStore>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    /// Sets the run identity.
    #[must_use]
    pub fn with_identity(mut self, identity: RunIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<RunConfig> {
        &self.config
    }

    /// Returns the session factory.
    #[must_use]
    pub fn sessions(&self) -> &Arc<dyn SessionFactory> {
        &self.sessions
    }

    /// Returns the session store.
    #[must_use]
    pub fn session_store(&self) -> &Arc<dyn SessionStore> {
        &self.session_store
    }

    /// Returns the artifact store.
    #[must_use]
    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.cancellation
    }

    /// Emits an event tagged with the run id.
    pub fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        let mut enriched = data.unwrap_or_else(|| serde_json::json!({}));
        if let serde_json::Value::Object(ref mut map) = enriched {
            map.insert(
                "run_id".to_string(),
                serde_json::json!(self.identity.run_id.to_string()),
            );
        }
        self.events.try_emit(event_type, Some(enriched));
    }
}

impl fmt::Debug for RunEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunEnvironment")
            .field("identity", &self.identity)
            .field("config", &self.config)
            .field("sessions", &self.sessions)
            .field("session_store", &self.session_store)
            .field("artifacts", &self.artifacts)
            .field("cancellation", &self.cancellation)
            .finish_non_exhaustive()
    }
}
