//! Serialized authenticated browser-context state.
//!
//! The layout matches the `storageState` JSON files written by browser
//! harnesses, so state captured by an external runner can be restored here
//! and vice versa.

use serde::{Deserialize, Serialize};

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SameSite {
    /// Sent on all requests.
    Strict,
    /// Sent on top-level navigations.
    #[default]
    Lax,
    /// Sent cross-site (requires `secure`).
    None,
}

/// A single browser cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Host the cookie is scoped to. A leading `.` also covers subdomains.
    pub domain: String,
    /// Path prefix the cookie applies to.
    #[serde(default = "default_path")]
    pub path: String,
    /// Expiry as Unix seconds; `-1` for session cookies.
    #[serde(default = "default_expires")]
    pub expires: f64,
    /// Hidden from page scripts.
    #[serde(default)]
    pub http_only: bool,
    /// Only sent over HTTPS.
    #[serde(default)]
    pub secure: bool,
    /// `SameSite` attribute.
    #[serde(default)]
    pub same_site: SameSite,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_expires() -> f64 {
    -1.0
}

impl Cookie {
    /// Creates a session cookie for `domain` with path `/`.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: default_path(),
            expires: default_expires(),
            http_only: false,
            secure: false,
            same_site: SameSite::default(),
        }
    }

    /// Returns true if the cookie should be sent to `host` for `path`.
    #[must_use]
    pub fn applies_to(&self, host: &str, path: &str) -> bool {
        let host_matches = match self.domain.strip_prefix('.') {
            Some(domain) => host == domain || host.ends_with(&self.domain),
            None => host == self.domain,
        };
        host_matches && path_matches(&self.path, path)
    }

    /// Returns true once a persistent cookie's expiry (Unix seconds) has passed.
    #[must_use]
    pub fn is_expired_at(&self, now: f64) -> bool {
        self.expires >= 0.0 && self.expires <= now
    }

    fn same_slot(&self, other: &Self) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }
}

fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    request_path == cookie_path
        || (request_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/')))
}

/// A local-storage entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry {
    /// Entry key.
    pub name: String,
    /// Entry value.
    pub value: String,
}

/// Local storage captured for one origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginState {
    /// Origin such as `https://conduit.example`.
    pub origin: String,
    /// Local-storage entries for the origin.
    #[serde(default)]
    pub local_storage: Vec<StorageEntry>,
}

/// Opaque authenticated session state handed between stages.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionState {
    /// Cookies of the browser context.
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    /// Per-origin local storage.
    #[serde(default)]
    pub origins: Vec<OriginState>,
}

impl SessionState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the state carries neither cookies nor storage.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.origins.iter().all(|o| o.local_storage.is_empty())
    }

    /// Adds or replaces a cookie with the same name, domain and path.
    pub fn set_cookie(&mut self, cookie: Cookie) {
        self.cookies.retain(|c| !c.same_slot(&cookie));
        self.cookies.push(cookie);
    }

    /// Removes the cookie with the same name, domain and path as `cookie`.
    pub fn remove_cookie(&mut self, cookie: &Cookie) -> bool {
        let before = self.cookies.len();
        self.cookies.retain(|c| !c.same_slot(cookie));
        self.cookies.len() != before
    }

    /// Drops every cookie that expired at or before `now` (Unix seconds).
    pub fn purge_expired(&mut self, now: f64) {
        self.cookies.retain(|c| !c.is_expired_at(now));
    }

    /// Finds a cookie by name.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    /// Sets a local-storage entry for an origin.
    pub fn set_local_storage(&mut self, origin: &str, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        let origin_state = if let Some(pos) = self.origins.iter().position(|o| o.origin == origin) {
            &mut self.origins[pos]
        } else {
            self.origins.push(OriginState {
                origin: origin.to_string(),
                local_storage: Vec::new(),
            });
            let last = self.origins.len() - 1;
            &mut self.origins[last]
        };

        if let Some(entry) = origin_state.local_storage.iter_mut().find(|e| e.name == name) {
            entry.value = value;
        } else {
            origin_state.local_storage.push(StorageEntry { name, value });
        }
    }

    /// Reads a local-storage entry for an origin.
    #[must_use]
    pub fn local_storage(&self, origin: &str, name: &str) -> Option<&str> {
        self.origins
            .iter()
            .find(|o| o.origin == origin)?
            .local_storage
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }
}
