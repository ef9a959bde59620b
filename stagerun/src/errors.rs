//! Error types for the stagerun framework.
//!
//! Each concern owns a focused error enum; [`StagerunError`] unifies them for
//! callers that only need to propagate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for stagerun operations.
#[derive(Debug, Error)]
pub enum StagerunError {
    /// The stage graph or run configuration is invalid.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A session store operation failed.
    #[error("{0}")]
    SessionStore(#[from] SessionStoreError),

    /// An artifact store operation failed.
    #[error("{0}")]
    Artifact(#[from] ArtifactError),

    /// Logging in against the backend failed.
    #[error("{0}")]
    Auth(#[from] AuthError),

    /// A backend API call failed.
    #[error("{0}")]
    Api(#[from] ApiError),

    /// Request interception failed.
    #[error("{0}")]
    Intercept(#[from] InterceptError),

    /// The automation session could not be created or driven.
    #[error("Session error: {0}")]
    Session(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StagerunError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Machine-readable metadata attached to configuration errors.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Error code (e.g., "CONFIG-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a stage graph or run configuration is invalid.
///
/// Always reported before any stage executes.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Machine-readable error info.
    pub error_info: Option<ErrorInfo>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// A dependency cycle, given as the path of stages that closes it.
    #[must_use]
    pub fn cycle(cycle_path: Vec<String>) -> Self {
        let path = cycle_path.join(" -> ");
        Self::new(format!("Cycle detected in stage graph: {path}"))
            .with_stages(cycle_path)
            .with_error_info(
                ErrorInfo::new("CONFIG-CYCLE", format!("Stage graph contains a dependency cycle: {path}"))
                    .with_fix_hint(
                        "Remove one of the dependencies in the cycle. A stage may not depend on its own teardown.",
                    ),
            )
    }

    /// A stage depends on a stage that was never declared.
    #[must_use]
    pub fn missing_dependency(stage: &str, dependency: &str) -> Self {
        Self::new(format!("Stage '{stage}' depends on unknown stage '{dependency}'"))
            .with_stages(vec![stage.to_string(), dependency.to_string()])
            .with_error_info(
                ErrorInfo::new("CONFIG-MISSING_DEP", format!("Dependency '{dependency}' not found"))
                    .with_fix_hint("Check the stage name for typos."),
            )
    }

    /// A teardown pairing references a stage that cannot be torn down.
    #[must_use]
    pub fn teardown_target(stage: &str, target: &str, reason: &str) -> Self {
        Self::new(format!(
            "Stage '{stage}' declares teardown pairing with '{target}': {reason}"
        ))
        .with_stages(vec![stage.to_string(), target.to_string()])
        .with_error_info(
            ErrorInfo::new("CONFIG-TEARDOWN_TARGET", reason.to_string())
                .with_context_entry("teardown", stage)
                .with_context_entry("target", target),
        )
    }

    /// Two stages share a name.
    #[must_use]
    pub fn duplicate_stage(stage: &str) -> Self {
        Self::new(format!("Stage '{stage}' is declared more than once"))
            .with_stages(vec![stage.to_string()])
            .with_error_info(ErrorInfo::new("CONFIG-DUPLICATE", "Stage names must be unique"))
    }

    /// The graph has no stages.
    #[must_use]
    pub fn empty_graph() -> Self {
        Self::new("Stage graph has no stages").with_error_info(
            ErrorInfo::new("CONFIG-EMPTY", "Cannot build an empty stage graph")
                .with_fix_hint("Add at least one stage before building."),
        )
    }

    /// A run setting is missing or malformed.
    #[must_use]
    pub fn invalid_setting(key: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(format!("Invalid setting '{key}': {reason}"))
            .with_error_info(ErrorInfo::new("CONFIG-SETTING", reason).with_context_entry("key", key))
    }

    /// Returns the machine-readable code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Errors raised by session stores.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    /// Nothing was saved under the key.
    #[error("Session state not found: '{key}'")]
    NotFound {
        /// The requested key.
        key: String,
    },

    /// The key cannot be mapped to storage.
    #[error("Invalid session key '{key}': {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The stored value could not be decoded.
    #[error("Corrupt session state '{key}': {source}")]
    Corrupt {
        /// The key being read.
        key: String,
        /// The decode error.
        #[source]
        source: serde_json::Error,
    },

    /// Reading or writing storage failed.
    #[error("Session store IO error for '{key}': {source}")]
    Io {
        /// The key being accessed.
        key: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl SessionStoreError {
    /// Returns true if the key was never saved.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors raised by the artifact store.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// A consumer required an artifact no producer wrote.
    #[error("Artifact '{key}' is missing: no stage produced it in this run")]
    Missing {
        /// The missing key.
        key: String,
    },

    /// A second stage tried to produce an existing artifact.
    #[error("Artifact '{key}' was already produced by '{producer}'; '{attempted_by}' cannot overwrite it")]
    Conflict {
        /// The contested key.
        key: String,
        /// The original producer.
        producer: String,
        /// The stage that attempted the write.
        attempted_by: String,
    },

    /// The artifact exists but has an unexpected shape.
    #[error("Artifact '{key}' has unexpected type: expected {expected}")]
    UnexpectedType {
        /// The artifact key.
        key: String,
        /// The expected JSON type.
        expected: &'static str,
    },

    /// The artifact file could not be decoded.
    #[error("Corrupt artifact file: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// Reading or writing the artifact file failed.
    #[error("Artifact store IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised when obtaining an auth token.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The backend answered with a non-2xx status.
    #[error("Login rejected with status {status}: {body}")]
    Rejected {
        /// The HTTP status.
        status: u16,
        /// The response body.
        body: String,
    },

    /// The response did not carry a token.
    #[error("Malformed login response: {0}")]
    MalformedBody(String),

    /// The request never completed.
    #[error("Login request failed: {0}")]
    Transport(String),
}

/// Errors raised by backend API calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The backend answered with a status the call does not accept.
    #[error("{method} {path} returned {status}, expected {expected}: {body}")]
    UnexpectedStatus {
        /// HTTP method.
        method: String,
        /// Request path.
        path: String,
        /// Status received.
        status: u16,
        /// Status expected.
        expected: u16,
        /// Response body.
        body: String,
    },

    /// The response body could not be decoded.
    #[error("Failed to decode response of {path}: {reason}")]
    Decode {
        /// Request path.
        path: String,
        /// Decode failure.
        reason: String,
    },

    /// The request never completed.
    #[error("API request failed: {0}")]
    Transport(String),

    /// The API root cannot carry path segments.
    #[error("Invalid API root '{url}': {reason}")]
    InvalidUrl {
        /// The configured root.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Errors raised by the interception engine.
#[derive(Debug, Clone, Error)]
pub enum InterceptError {
    /// A URL pattern failed to compile.
    #[error("Invalid URL pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern source.
        pattern: String,
        /// Compile error.
        reason: String,
    },

    /// A pass-through-mutate handler could not transform a response.
    #[error("Failed to transform response of {url}: {reason}")]
    Transform {
        /// The request URL.
        url: String,
        /// Why the transform failed.
        reason: String,
    },

    /// Forwarding to the real backend failed.
    #[error("Upstream request to {url} failed: {reason}")]
    Upstream {
        /// The request URL.
        url: String,
        /// Transport failure.
        reason: String,
    },

    /// The request was aborted by a rule.
    #[error("Request to {url} aborted: net::ERR_{code}")]
    Aborted {
        /// The request URL.
        url: String,
        /// Simulated network error code.
        code: String,
    },

    /// No matching response was observed in time.
    #[error("Timed out after {waited_ms}ms waiting for a response matching '{pattern}'")]
    Timeout {
        /// The awaited pattern.
        pattern: String,
        /// How long the wait lasted.
        waited_ms: u64,
    },
}
