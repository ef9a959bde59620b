//! Stage declarations.

use crate::core::StageKind;
use crate::errors::ConfigurationError;
use crate::stages::Stage;
use std::sync::Arc;
use std::time::Duration;

/// Declaration of one stage in a graph.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// Unique stage name.
    pub name: String,
    /// The stage body.
    pub runner: Arc<dyn Stage>,
    /// Role of the stage.
    pub kind: StageKind,
    /// Stages that must pass before this one starts, in declaration order.
    pub dependencies: Vec<String>,
    /// For teardowns: the setup stage being torn down.
    pub teardown_of: Option<String>,
    /// For setups: the teardown stage paired with this one.
    pub teardown: Option<String>,
    /// Session-store key restored into the session before the body runs.
    pub session_seed: Option<String>,
    /// Session-store key the final session state is saved under on success.
    pub persist_session: Option<String>,
    /// Deadline overriding the configured stage timeout.
    pub timeout: Option<Duration>,
}

impl StageSpec {
    /// Declares an ordinary stage.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            runner,
            kind: StageKind::Ordinary,
            dependencies: Vec::new(),
            teardown_of: None,
            teardown: None,
            session_seed: None,
            persist_session: None,
            timeout: None,
        }
    }

    /// Declares a setup stage.
    #[must_use]
    pub fn setup(name: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        Self {
            kind: StageKind::Setup,
            ..Self::new(name, runner)
        }
    }

    /// Declares a teardown stage for `setup`.
    #[must_use]
    pub fn teardown_of(name: impl Into<String>, runner: Arc<dyn Stage>, setup: impl Into<String>) -> Self {
        Self {
            kind: StageKind::Teardown,
            teardown_of: Some(setup.into()),
            ..Self::new(name, runner)
        }
    }

    /// Adds a dependency. Duplicates are ignored.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        let dep = dep.into();
        if !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
        self
    }

    /// Adds several dependencies.
    #[must_use]
    pub fn with_dependencies<I, S>(self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        deps.into_iter().fold(self, |spec, dep| spec.with_dependency(dep))
    }

    /// Pairs this setup with a teardown stage declared elsewhere.
    ///
    /// The named stage becomes a teardown of this one when the graph is built.
    #[must_use]
    pub fn with_teardown(mut self, teardown: impl Into<String>) -> Self {
        self.teardown = Some(teardown.into());
        self
    }

    /// Restores session state from `key` before running.
    #[must_use]
    pub fn with_session_seed(mut self, key: impl Into<String>) -> Self {
        self.session_seed = Some(key.into());
        self
    }

    /// Saves the final session state under `key` when the stage passes.
    #[must_use]
    pub fn with_persist_session(mut self, key: impl Into<String>) -> Self {
        self.persist_session = Some(key.into());
        self
    }

    /// Sets a per-stage deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Checks what can be checked without the rest of the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage depends on or tears down itself.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::new("Stage name cannot be empty"));
        }
        if self.dependencies.contains(&self.name) {
            return Err(ConfigurationError::cycle(vec![
                self.name.clone(),
                self.name.clone(),
            ]));
        }
        if self.teardown_of.as_deref() == Some(self.name.as_str())
            || self.teardown.as_deref() == Some(self.name.as_str())
        {
            return Err(ConfigurationError::teardown_target(
                &self.name,
                &self.name,
                "a stage cannot tear itself down",
            ));
        }
        Ok(())
    }
}
