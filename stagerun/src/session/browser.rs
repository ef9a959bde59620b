//! The seam to the browser-automation harness.
//!
//! Each stage runs inside its own [`AutomationSession`]. A session owns its
//! cookie jar and local storage plus an [`InterceptionEngine`] that sees every
//! request the session issues. [`HeadlessSession`] is the in-process
//! implementation used by API-driven stages and tests.

use super::{Cookie, SameSite, SessionState};
use crate::errors::{InterceptError, StagerunError};
use crate::intercept::{InterceptedRequest, InterceptedResponse, InterceptionEngine, Upstream};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A browser context driven by one stage.
#[async_trait]
pub trait AutomationSession: Send + Sync + Debug {
    /// Unique session id.
    fn id(&self) -> &str;

    /// The interception engine every request of this session flows through.
    fn interceptor(&self) -> &InterceptionEngine;

    /// Captures the current cookies and local storage.
    async fn storage_state(&self) -> SessionState;

    /// Replaces cookies and local storage with `state`.
    async fn load_storage_state(&self, state: SessionState);

    /// Issues a request as the page would, through the interception engine.
    async fn fetch(&self, request: InterceptedRequest) -> Result<InterceptedResponse, InterceptError>;

    /// Releases the session. Later fetches fail.
    async fn close(&self);

    /// Reads one local-storage entry.
    async fn local_storage(&self, origin: &str, name: &str) -> Option<String> {
        self.storage_state()
            .await
            .local_storage(origin, name)
            .map(str::to_string)
    }
}

/// Creates a fresh, isolated session for each stage attempt.
#[async_trait]
pub trait SessionFactory: Send + Sync + Debug {
    /// Opens a new session for `stage`.
    async fn new_session(&self, stage: &str) -> Result<Arc<dyn AutomationSession>, StagerunError>;
}

/// In-process session that forwards to an [`Upstream`] and keeps its own cookie jar.
pub struct HeadlessSession {
    id: String,
    engine: InterceptionEngine,
    upstream: Arc<dyn Upstream>,
    state: Mutex<SessionState>,
    closed: AtomicBool,
}

impl Debug for HeadlessSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessSession")
            .field("id", &self.id)
            .field("engine", &self.engine)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl HeadlessSession {
    /// Creates an empty session.
    #[must_use]
    pub fn new(id: impl Into<String>, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            id: id.into(),
            engine: InterceptionEngine::new(),
            upstream,
            state: Mutex::new(SessionState::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn attach_cookies(&self, request: &mut InterceptedRequest, url: &Url) {
        let host = url.host_str().unwrap_or_default();
        let now = unix_now();
        let header = {
            let state = self.state.lock();
            state
                .cookies
                .iter()
                .filter(|cookie| !cookie.is_expired_at(now))
                .filter(|cookie| cookie.applies_to(host, url.path()))
                .filter(|cookie| !cookie.secure || url.scheme() == "https")
                .map(|cookie| format!("{}={}", cookie.name, cookie.value))
                .collect::<Vec<_>>()
                .join("; ")
        };
        if !header.is_empty() && request.header("cookie").is_none() {
            request.headers.insert("cookie".to_string(), header);
        }
    }

    fn capture_cookies(&self, response: &InterceptedResponse, url: &Url) {
        let host = url.host_str().unwrap_or_default();
        let now = unix_now();
        let mut state = self.state.lock();
        for raw in response.set_cookie_headers() {
            let Some(cookie) = parse_set_cookie(raw, host, url.path(), now) else {
                debug!(session = %self.id, header = %raw, "Ignoring malformed Set-Cookie");
                continue;
            };
            if cookie.is_expired_at(now) {
                if state.remove_cookie(&cookie) {
                    debug!(session = %self.id, cookie = %cookie.name, "Cookie expired");
                }
            } else {
                debug!(session = %self.id, cookie = %cookie.name, "Captured cookie");
                state.set_cookie(cookie);
            }
        }
    }
}

#[async_trait]
impl AutomationSession for HeadlessSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn interceptor(&self) -> &InterceptionEngine {
        &self.engine
    }

    async fn storage_state(&self) -> SessionState {
        let mut state = self.state.lock();
        state.purge_expired(unix_now());
        state.clone()
    }

    async fn load_storage_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    async fn fetch(&self, mut request: InterceptedRequest) -> Result<InterceptedResponse, InterceptError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(InterceptError::Aborted {
                url: request.url,
                code: "ABORTED".to_string(),
            });
        }

        let url = Url::parse(&request.url).map_err(|err| InterceptError::Upstream {
            url: request.url.clone(),
            reason: err.to_string(),
        })?;
        self.attach_cookies(&mut request, &url);

        let response = self.engine.dispatch(&request, self.upstream.as_ref()).await?;
        self.capture_cookies(&response, &url);
        Ok(response)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.engine.clear();
            debug!(session = %self.id, "Session closed");
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Converts one `Set-Cookie` header into a jar entry.
///
/// `Max-Age` wins over `Expires`; a non-positive `Max-Age` yields an entry
/// that is already expired. Without a `Domain` attribute the cookie is
/// host-only; without a `Path` it takes the request path's directory.
#[allow(clippy::cast_precision_loss)]
fn parse_set_cookie(raw: &str, host: &str, request_path: &str, now: f64) -> Option<Cookie> {
    let parsed = cookie::Cookie::parse(raw).ok()?;

    let domain = match parsed.domain() {
        Some(domain) if !domain.is_empty() => format!(".{}", domain.trim_start_matches('.')),
        _ => host.to_string(),
    };
    let mut jar_cookie = Cookie::new(parsed.name(), parsed.value(), domain);
    jar_cookie.path = match parsed.path() {
        Some(path) if path.starts_with('/') => path.to_string(),
        _ => default_cookie_path(request_path),
    };
    jar_cookie.http_only = parsed.http_only().unwrap_or(false);
    jar_cookie.secure = parsed.secure().unwrap_or(false);
    jar_cookie.same_site = match parsed.same_site() {
        Some(cookie::SameSite::Strict) => SameSite::Strict,
        Some(cookie::SameSite::None) => SameSite::None,
        _ => SameSite::Lax,
    };
    if let Some(max_age) = parsed.max_age() {
        jar_cookie.expires = if max_age.is_positive() {
            now + max_age.whole_seconds() as f64
        } else {
            0.0
        };
    } else if let Some(expires) = parsed.expires_datetime() {
        jar_cookie.expires = (expires.unix_timestamp() as f64).max(0.0);
    }
    Some(jar_cookie)
}

fn default_cookie_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => request_path[..idx].to_string(),
    }
}

/// Opens [`HeadlessSession`]s that share one upstream.
pub struct HeadlessSessionFactory {
    upstream: Arc<dyn Upstream>,
    opened: AtomicUsize,
}

impl Debug for HeadlessSessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessSessionFactory")
            .field("opened", &self.opened())
            .finish_non_exhaustive()
    }
}

impl HeadlessSessionFactory {
    /// Creates a factory forwarding to `upstream`.
    #[must_use]
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self {
            upstream,
            opened: AtomicUsize::new(0),
        }
    }

    /// Number of sessions opened so far.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for HeadlessSessionFactory {
    async fn new_session(&self, stage: &str) -> Result<Arc<dyn AutomationSession>, StagerunError> {
        let n = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{stage}#{n}");
        info!(session = %id, "Opening headless session");
        Ok(Arc::new(HeadlessSession::new(id, self.upstream.clone())))
    }
}
