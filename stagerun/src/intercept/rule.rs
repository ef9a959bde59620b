//! Interception rules: a URL pattern bound to a handler.

use super::UrlPattern;
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Rewrites a parsed JSON response body.
pub type BodyTransform =
    Arc<dyn Fn(serde_json::Value) -> anyhow::Result<serde_json::Value> + Send + Sync>;

/// A fabricated response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticResponse {
    /// HTTP status.
    pub status: u16,
    /// Headers, names lower-cased.
    pub headers: BTreeMap<String, String>,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl StaticResponse {
    /// Creates a response with a raw body.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Creates a JSON response.
    #[must_use]
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string()).with_header("content-type", "application/json")
    }

    /// Sets a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }
}

/// Fields of a mutated response that replace the backend's values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseOverrides {
    /// Replacement status.
    pub status: Option<u16>,
    /// Headers added or replaced.
    pub headers: BTreeMap<String, String>,
}

/// Simulated network failure codes for aborted requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbortReason {
    /// Generic failure.
    #[default]
    Failed,
    /// Request aborted.
    Aborted,
    /// Request timed out.
    TimedOut,
    /// Connection refused by the host.
    ConnectionRefused,
    /// Host name could not be resolved.
    NameNotResolved,
    /// Network is unreachable.
    InternetDisconnected,
}

impl AbortReason {
    /// Returns the browser error code suffix (`net::ERR_<code>`).
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Failed => "FAILED",
            Self::Aborted => "ABORTED",
            Self::TimedOut => "TIMED_OUT",
            Self::ConnectionRefused => "CONNECTION_REFUSED",
            Self::NameNotResolved => "NAME_NOT_RESOLVED",
            Self::InternetDisconnected => "INTERNET_DISCONNECTED",
        }
    }
}

/// What to do with a matched request.
#[derive(Clone)]
pub enum RouteHandler {
    /// Respond immediately; the backend is never contacted.
    Fulfill(StaticResponse),
    /// Fetch the real response, transform its JSON body, deliver the result.
    PassThroughMutate {
        /// Body transformation.
        transform: BodyTransform,
        /// Status/header overrides applied to the delivered response.
        overrides: ResponseOverrides,
    },
    /// Fail the request with a simulated network error.
    Abort(AbortReason),
}

impl RouteHandler {
    /// Creates a fulfill handler.
    #[must_use]
    pub fn fulfill(response: StaticResponse) -> Self {
        Self::Fulfill(response)
    }

    /// Creates a pass-through-mutate handler keeping the backend status and headers.
    #[must_use]
    pub fn mutate<F>(transform: F) -> Self
    where
        F: Fn(serde_json::Value) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static,
    {
        Self::PassThroughMutate {
            transform: Arc::new(transform),
            overrides: ResponseOverrides::default(),
        }
    }

    /// Creates an abort handler.
    #[must_use]
    pub fn abort(reason: AbortReason) -> Self {
        Self::Abort(reason)
    }

    /// Replaces the overrides of a pass-through-mutate handler; other handlers are unchanged.
    #[must_use]
    pub fn with_overrides(self, overrides: ResponseOverrides) -> Self {
        match self {
            Self::PassThroughMutate { transform, .. } => Self::PassThroughMutate { transform, overrides },
            other => other,
        }
    }

    /// Short handler name for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fulfill(_) => "fulfill",
            Self::PassThroughMutate { .. } => "pass-through-mutate",
            Self::Abort(_) => "abort",
        }
    }
}

impl fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fulfill(response) => f.debug_tuple("Fulfill").field(response).finish(),
            Self::PassThroughMutate { overrides, .. } => f
                .debug_struct("PassThroughMutate")
                .field("overrides", overrides)
                .finish_non_exhaustive(),
            Self::Abort(reason) => f.debug_tuple("Abort").field(reason).finish(),
        }
    }
}

/// A registered rule.
#[derive(Debug)]
pub struct InterceptRule {
    pub(crate) id: u64,
    pub(crate) pattern: UrlPattern,
    pub(crate) handler: RouteHandler,
    /// Remaining matches; `None` for unlimited.
    remaining: Option<AtomicUsize>,
}

impl InterceptRule {
    pub(crate) fn new(id: u64, pattern: UrlPattern, handler: RouteHandler, times: Option<NonZeroUsize>) -> Self {
        Self {
            id,
            pattern,
            handler,
            remaining: times.map(|n| AtomicUsize::new(n.get())),
        }
    }

    /// Returns the rule's pattern.
    #[must_use]
    pub fn pattern(&self) -> &UrlPattern {
        &self.pattern
    }

    /// Returns the rule's handler.
    #[must_use]
    pub fn handler(&self) -> &RouteHandler {
        &self.handler
    }

    /// Consumes one match if any remain.
    pub(crate) fn try_claim(&self) -> bool {
        match &self.remaining {
            None => true,
            Some(remaining) => remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        }
    }

    /// Returns true once a limited rule has no matches left.
    pub(crate) fn is_exhausted(&self) -> bool {
        self.remaining
            .as_ref()
            .is_some_and(|remaining| remaining.load(Ordering::SeqCst) == 0)
    }
}

/// Sets the value at a JSON pointer, failing if the path does not exist.
///
/// ```
/// use stagerun::intercept::set_json_pointer;
///
/// let mut body = serde_json::json!({"articles": [{"title": "old"}]});
/// set_json_pointer(&mut body, "/articles/0/title", serde_json::json!("X")).unwrap();
/// assert_eq!(body["articles"][0]["title"], "X");
/// ```
pub fn set_json_pointer(
    target: &mut serde_json::Value,
    pointer: &str,
    value: serde_json::Value,
) -> anyhow::Result<()> {
    let slot = target
        .pointer_mut(pointer)
        .ok_or_else(|| anyhow::anyhow!("response body has no value at '{pointer}'"))?;
    *slot = value;
    Ok(())
}
