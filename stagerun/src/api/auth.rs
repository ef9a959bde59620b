//! Login against the backend API.
//!
//! Tokens are fetched fresh on every call. Concurrent stages each perform
//! their own login; nothing is cached between calls.

use crate::config::RunConfig;
use crate::errors::AuthError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Login credentials.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A bearer token returned by login.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wraps a raw token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the `Authorization` header value (`Token <value>`).
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("Token {}", self.0)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    user: &'a Credentials,
}

#[derive(Deserialize)]
struct LoginResponse {
    user: Option<LoginUser>,
}

#[derive(Deserialize)]
struct LoginUser {
    token: Option<String>,
}

/// Obtains auth tokens from `POST {api}/users/login`.
#[derive(Debug, Clone)]
pub struct AuthTokenService {
    client: reqwest::Client,
    login_url: String,
}

impl AuthTokenService {
    /// Creates a service posting to `{api_root}/users/login`.
    ///
    /// `api_root` includes the API prefix, e.g. `https://api.test/api`.
    pub fn new(api_root: &str, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AuthError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            login_url: format!("{}/users/login", api_root.trim_end_matches('/')),
        })
    }

    /// Creates a service from run configuration.
    pub fn from_config(config: &RunConfig) -> Result<Self, AuthError> {
        Self::new(&config.api_root(), config.action_timeout())
    }

    /// Logs in and returns a token.
    ///
    /// # Errors
    ///
    /// [`AuthError::Rejected`] on a non-2xx answer, [`AuthError::Transport`]
    /// when the request fails or times out, [`AuthError::MalformedBody`] when
    /// the response lacks a non-empty `user.token`.
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthToken, AuthError> {
        debug!(url = %self.login_url, email = %credentials.email, "Logging in");

        let response = self
            .client
            .post(&self.login_url)
            .json(&LoginRequest { user: credentials })
            .send()
            .await
            .map_err(|err| AuthError::Transport(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| AuthError::Transport(err.to_string()))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), email = %credentials.email, "Login rejected");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: LoginResponse =
            serde_json::from_str(&body).map_err(|err| AuthError::MalformedBody(err.to_string()))?;
        let token = parsed
            .user
            .and_then(|user| user.token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError::MalformedBody("response has no user.token".to_string()))?;

        Ok(AuthToken(token))
    }
}
