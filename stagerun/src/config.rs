//! Run configuration.
//!
//! Values come from the environment (see [`RunConfig::from_env`]) or from a
//! serialized document; every optional field has a default.

use crate::api::Credentials;
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings shared by every stage of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Frontend base URL.
    pub base_url: String,
    /// Backend base URL, without the API prefix.
    pub api_base_url: String,
    /// Path prefix of every API endpoint.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// Account used by authenticating stages.
    #[serde(default)]
    pub credentials: Credentials,
    /// Maximum concurrently running stages.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Extra attempts for a failed stage.
    #[serde(default)]
    pub retries: u32,
    /// Deadline for a single action or API call, in milliseconds.
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
    /// Deadline for a page navigation, in milliseconds.
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    /// Default deadline for a whole stage, in milliseconds.
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
    /// Directory holding the artifact file.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_action_timeout_ms() -> u64 {
    5_000
}

fn default_navigation_timeout_ms() -> u64 {
    10_000
}

fn default_stage_timeout_ms() -> u64 {
    30_000
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".auth")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4200".to_string(),
            api_base_url: "http://localhost:3000".to_string(),
            api_prefix: default_api_prefix(),
            credentials: Credentials::default(),
            workers: default_workers(),
            retries: 0,
            action_timeout_ms: default_action_timeout_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            stage_timeout_ms: default_stage_timeout_ms(),
            state_dir: default_state_dir(),
        }
    }
}

impl RunConfig {
    /// Creates a configuration for the given frontend and backend.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from process environment variables.
    ///
    /// `BASE_URL`, `BASE_API_URL`, `USER_EMAIL` and `USER_PASSWORD` are
    /// required. `WORKERS`, `RETRIES`, `ACTION_TIMEOUT_MS`,
    /// `NAVIGATION_TIMEOUT_MS`, `STAGE_TIMEOUT_MS` and `STATE_DIR` are
    /// optional. When `CI` is set and `RETRIES` is not, two retries are used.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ConfigurationError::invalid_setting(key, "required variable is not set"))
        };

        let mut config = Self::new(required("BASE_URL")?, required("BASE_API_URL")?);
        config.credentials = Credentials::new(required("USER_EMAIL")?, required("USER_PASSWORD")?);

        if let Some(workers) = parse_var::<usize>(&lookup, "WORKERS")? {
            if workers == 0 {
                return Err(ConfigurationError::invalid_setting("WORKERS", "must be at least 1"));
            }
            config.workers = workers;
        }
        config.retries = match parse_var::<u32>(&lookup, "RETRIES")? {
            Some(retries) => retries,
            None if lookup("CI").is_some() => 2,
            None => 0,
        };
        if let Some(ms) = parse_var::<u64>(&lookup, "ACTION_TIMEOUT_MS")? {
            config.action_timeout_ms = ms;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "NAVIGATION_TIMEOUT_MS")? {
            config.navigation_timeout_ms = ms;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "STAGE_TIMEOUT_MS")? {
            config.stage_timeout_ms = ms;
        }
        if let Some(dir) = lookup("STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Sets the worker count (at least 1).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the default stage timeout.
    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the state directory.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Backend base URL joined with the API prefix, e.g. `https://api.test/api`.
    #[must_use]
    pub fn api_root(&self) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            self.api_prefix.trim_matches('/')
        )
        .trim_end_matches('/')
        .to_string()
    }

    /// Absolute URL of an API path such as `/articles`.
    #[must_use]
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.api_root(), path.trim_start_matches('/'))
    }

    /// Origin of the frontend, used to scope local storage.
    #[must_use]
    pub fn origin(&self) -> String {
        self.base_url.trim_end_matches('/').to_string()
    }

    /// Location of the artifact file.
    #[must_use]
    pub fn artifacts_path(&self) -> PathBuf {
        self.state_dir.join("artifacts.json")
    }

    /// Action deadline.
    #[must_use]
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    /// Navigation deadline.
    #[must_use]
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    /// Default stage deadline.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigurationError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|err| ConfigurationError::invalid_setting(key, format!("'{raw}': {err}")))
        })
        .transpose()
}
