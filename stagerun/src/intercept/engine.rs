//! Rule evaluation and response delivery for one automation session.

use super::{
    InterceptRule, InterceptedRequest, InterceptedResponse, ResponseOverrides, ResponseSource,
    RouteHandler, Upstream, UrlPattern,
};
use super::message::SET_COOKIE;
use crate::errors::InterceptError;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

type RuleList = RwLock<Vec<Arc<InterceptRule>>>;

const OBSERVER_CAPACITY: usize = 64;

/// Intercepts the outgoing requests of one automation session.
///
/// Rules are evaluated in registration order and the first live match wins.
/// Requests matching no rule are forwarded unmodified. Every delivered
/// response is published to [`ResponseWaiter`]s.
pub struct InterceptionEngine {
    rules: Arc<RuleList>,
    next_id: AtomicU64,
    observed: broadcast::Sender<InterceptedResponse>,
}

impl Default for InterceptionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InterceptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptionEngine")
            .field("rules", &self.rule_count())
            .finish()
    }
}

impl InterceptionEngine {
    /// Creates an engine with no rules.
    #[must_use]
    pub fn new() -> Self {
        let (observed, _) = broadcast::channel(OBSERVER_CAPACITY);
        Self {
            rules: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
            observed,
        }
    }

    /// Adds a rule that applies to every matching request until deregistered.
    pub fn register_rule(&self, pattern: UrlPattern, handler: RouteHandler) -> RuleHandle {
        self.insert(pattern, handler, None)
    }

    /// Adds a rule that retires itself after `times` matches.
    pub fn register_rule_times(
        &self,
        pattern: UrlPattern,
        handler: RouteHandler,
        times: NonZeroUsize,
    ) -> RuleHandle {
        self.insert(pattern, handler, Some(times))
    }

    /// Compiles `glob` and registers a rule for it.
    pub fn route(&self, glob: &str, handler: RouteHandler) -> Result<RuleHandle, InterceptError> {
        Ok(self.register_rule(UrlPattern::glob(glob)?, handler))
    }

    /// Compiles `glob` and registers a rule that applies to the next match only.
    pub fn route_once(&self, glob: &str, handler: RouteHandler) -> Result<RuleHandle, InterceptError> {
        Ok(self.register_rule_times(UrlPattern::glob(glob)?, handler, NonZeroUsize::MIN))
    }

    fn insert(&self, pattern: UrlPattern, handler: RouteHandler, times: Option<NonZeroUsize>) -> RuleHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(rule_id = id, pattern = %pattern, handler = handler.label(), ?times, "Registered rule");
        self.rules
            .write()
            .push(Arc::new(InterceptRule::new(id, pattern, handler, times)));
        RuleHandle {
            id,
            rules: Arc::downgrade(&self.rules),
        }
    }

    /// Returns the number of live rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    /// Removes every rule.
    pub fn clear(&self) {
        self.rules.write().clear();
    }

    /// Routes one request through the rule list and returns what the session receives.
    ///
    /// # Errors
    ///
    /// Returns [`InterceptError::Aborted`] for abort rules and
    /// [`InterceptError::Upstream`] when the backend cannot be reached.
    /// Transform failures are not errors: the original response is delivered.
    pub async fn dispatch(
        &self,
        request: &InterceptedRequest,
        upstream: &dyn Upstream,
    ) -> Result<InterceptedResponse, InterceptError> {
        let response = match self.claim_rule(&request.url) {
            None => upstream.send(request).await?,
            Some(rule) => {
                debug!(rule_id = rule.id, url = %request.url, handler = rule.handler.label(), "Rule matched");
                match &rule.handler {
                    RouteHandler::Fulfill(fixed) => InterceptedResponse {
                        url: request.url.clone(),
                        status: fixed.status,
                        headers: fixed.headers.clone(),
                        set_cookies: fixed.headers.get(SET_COOKIE).cloned().into_iter().collect(),
                        body: fixed.body.clone(),
                        source: ResponseSource::Fulfilled,
                    },
                    RouteHandler::Abort(reason) => {
                        info!(url = %request.url, code = reason.code(), "Aborting request");
                        return Err(InterceptError::Aborted {
                            url: request.url.clone(),
                            code: reason.code().to_string(),
                        });
                    }
                    RouteHandler::PassThroughMutate { transform, overrides } => {
                        let original = upstream.send(request).await?;
                        match mutate(&original, transform.as_ref(), overrides) {
                            Ok(mutated) => mutated,
                            Err(err) => {
                                warn!(error = %err, "Passing original response through unmodified");
                                original
                            }
                        }
                    }
                }
            }
        };

        // No waiters is not an error.
        let _ = self.observed.send(response.clone());
        Ok(response)
    }

    /// Starts observing responses now; await the result with [`ResponseWaiter::wait`].
    ///
    /// Create the waiter before triggering the request so the response cannot be missed.
    #[must_use]
    pub fn response_waiter(&self, pattern: UrlPattern) -> ResponseWaiter {
        ResponseWaiter {
            pattern,
            receiver: self.observed.subscribe(),
        }
    }

    /// Waits for the next delivered response whose URL matches `pattern`.
    pub async fn wait_for_response(
        &self,
        pattern: UrlPattern,
        timeout: Duration,
    ) -> Result<InterceptedResponse, InterceptError> {
        self.response_waiter(pattern).wait(timeout).await
    }

    fn claim_rule(&self, url: &str) -> Option<Arc<InterceptRule>> {
        let matched = {
            let rules = self.rules.read();
            rules
                .iter()
                .find(|rule| rule.pattern.matches(url) && rule.try_claim())
                .cloned()
        };

        if matched.as_ref().is_some_and(|rule| rule.is_exhausted()) {
            self.rules.write().retain(|rule| !rule.is_exhausted());
        }
        matched
    }
}

fn mutate(
    original: &InterceptedResponse,
    transform: &(dyn Fn(serde_json::Value) -> anyhow::Result<serde_json::Value> + Send + Sync),
    overrides: &ResponseOverrides,
) -> Result<InterceptedResponse, InterceptError> {
    let transform_err = |reason: String| InterceptError::Transform {
        url: original.url.clone(),
        reason,
    };

    let parsed: serde_json::Value = original
        .json()
        .map_err(|err| transform_err(format!("body is not JSON: {err}")))?;
    let rewritten = transform(parsed).map_err(|err| transform_err(format!("{err:#}")))?;
    let body = serde_json::to_vec(&rewritten).map_err(|err| transform_err(err.to_string()))?;

    let mut headers = original.headers.clone();
    headers.remove("content-length");
    headers.extend(overrides.headers.clone());

    Ok(InterceptedResponse {
        url: original.url.clone(),
        status: overrides.status.unwrap_or(original.status),
        headers,
        set_cookies: original.set_cookies.clone(),
        body,
        source: ResponseSource::Mutated,
    })
}

/// Removes its rule when [`RuleHandle::deregister`] is called.
#[derive(Debug, Clone)]
pub struct RuleHandle {
    id: u64,
    rules: Weak<RuleList>,
}

impl RuleHandle {
    /// Returns the rule id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the rule. Returns false if it was already gone.
    pub fn deregister(&self) -> bool {
        let Some(rules) = self.rules.upgrade() else {
            return false;
        };
        let mut rules = rules.write();
        let before = rules.len();
        rules.retain(|rule| rule.id != self.id);
        rules.len() < before
    }
}

/// A pending wait for a response matching a pattern.
#[derive(Debug)]
pub struct ResponseWaiter {
    pattern: UrlPattern,
    receiver: broadcast::Receiver<InterceptedResponse>,
}

impl ResponseWaiter {
    /// Suspends until a matching response is delivered or `timeout` elapses.
    pub async fn wait(self, timeout: Duration) -> Result<InterceptedResponse, InterceptError> {
        let Self { pattern, mut receiver } = self;
        let started = Instant::now();
        let timed_out = |pattern: &UrlPattern| InterceptError::Timeout {
            pattern: pattern.to_string(),
            waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        let observed = tokio::time::timeout(timeout, async {
            loop {
                match receiver.recv().await {
                    Ok(response) if pattern.matches(&response.url) => return Some(response),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, pattern = %pattern, "Response waiter lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await;

        match observed {
            Ok(Some(response)) => Ok(response),
            Ok(None) | Err(_) => Err(timed_out(&pattern)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::{set_json_pointer, AbortReason, MockUpstream, StaticResponse};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const ARTICLES: &str = "https://api.test/api/articles?limit=10&offset=0";

    fn articles_body() -> Vec<u8> {
        json!({
            "articles": [
                {"slug": "first", "title": "Original", "description": "d1"},
                {"slug": "second", "title": "Second", "description": "d2"}
            ],
            "articlesCount": 2
        })
        .to_string()
        .into_bytes()
    }

    fn upstream_returning(times: usize, status: u16, body: Vec<u8>) -> MockUpstream {
        let mut upstream = MockUpstream::new();
        upstream
            .expect_send()
            .times(times)
            .returning(move |request| {
                Ok(InterceptedResponse::new(&request.url, status, body.clone())
                    .with_header("content-type", "application/json")
                    .with_header("content-length", body.len().to_string()))
            });
        upstream
    }

    #[tokio::test]
    async fn test_static_fulfill_never_contacts_backend() {
        let engine = InterceptionEngine::new();
        let upstream = upstream_returning(0, 200, Vec::new());
        engine
            .route("**/api/tags", RouteHandler::fulfill(StaticResponse::new(500, "boom")))
            .unwrap();

        for _ in 0..3 {
            let response = engine
                .dispatch(&InterceptedRequest::get("https://api.test/api/tags"), &upstream)
                .await
                .unwrap();
            assert_eq!(response.status, 500);
            assert_eq!(response.body, b"boom".to_vec());
            assert_eq!(response.source, ResponseSource::Fulfilled);
        }
    }

    #[tokio::test]
    async fn test_pass_through_mutate_rewrites_first_title() {
        let engine = InterceptionEngine::new();
        let upstream = upstream_returning(1, 200, articles_body());
        engine
            .route(
                "**/api/articles*",
                RouteHandler::mutate(|mut body| {
                    set_json_pointer(&mut body, "/articles/0/title", json!("X"))?;
                    Ok(body)
                }),
            )
            .unwrap();

        let response = engine
            .dispatch(&InterceptedRequest::get(ARTICLES), &upstream)
            .await
            .unwrap();

        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["articles"][0]["title"], "X");
        assert_eq!(body["articles"][1]["title"], "Second");
        assert_eq!(response.status, 200);
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.header("content-length"), None);
        assert_eq!(response.source, ResponseSource::Mutated);
    }

    #[tokio::test]
    async fn test_transform_failure_passes_original_through() {
        let engine = InterceptionEngine::new();
        let error_body = json!({"errors": {"body": ["unauthorized"]}}).to_string().into_bytes();
        let upstream = upstream_returning(1, 401, error_body.clone());
        engine
            .route(
                "**/api/articles*",
                RouteHandler::mutate(|mut body| {
                    set_json_pointer(&mut body, "/articles/0/title", json!("X"))?;
                    Ok(body)
                }),
            )
            .unwrap();

        let response = engine
            .dispatch(&InterceptedRequest::get(ARTICLES), &upstream)
            .await
            .unwrap();

        assert_eq!(response.status, 401);
        assert_eq!(response.body, error_body);
        assert_eq!(response.source, ResponseSource::Upstream);
    }

    #[tokio::test]
    async fn test_mutate_overrides_status() {
        let engine = InterceptionEngine::new();
        let upstream = upstream_returning(1, 200, articles_body());
        let overrides = ResponseOverrides {
            status: Some(203),
            ..ResponseOverrides::default()
        };
        engine
            .route("**/api/articles*", RouteHandler::mutate(Ok).with_overrides(overrides))
            .unwrap();

        let response = engine
            .dispatch(&InterceptedRequest::get(ARTICLES), &upstream)
            .await
            .unwrap();
        assert_eq!(response.status, 203);
    }

    #[tokio::test]
    async fn test_abort_simulates_network_error() {
        let engine = InterceptionEngine::new();
        let upstream = upstream_returning(0, 200, Vec::new());
        engine
            .route("**/api/tags", RouteHandler::abort(AbortReason::ConnectionRefused))
            .unwrap();

        let err = engine
            .dispatch(&InterceptedRequest::get("https://api.test/api/tags"), &upstream)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("net::ERR_CONNECTION_REFUSED"));
    }

    #[tokio::test]
    async fn test_first_registered_rule_wins() {
        let engine = InterceptionEngine::new();
        let upstream = upstream_returning(0, 200, Vec::new());
        engine
            .route("**/api/*", RouteHandler::fulfill(StaticResponse::new(201, "first")))
            .unwrap();
        engine
            .route("**/api/tags", RouteHandler::fulfill(StaticResponse::new(202, "second")))
            .unwrap();

        let response = engine
            .dispatch(&InterceptedRequest::get("https://api.test/api/tags"), &upstream)
            .await
            .unwrap();
        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn test_unmatched_request_passes_through() {
        let engine = InterceptionEngine::new();
        let upstream = upstream_returning(1, 200, b"{\"tags\":[]}".to_vec());
        engine
            .route("**/api/articles*", RouteHandler::abort(AbortReason::Failed))
            .unwrap();

        let response = engine
            .dispatch(&InterceptedRequest::get("https://api.test/api/tags"), &upstream)
            .await
            .unwrap();
        assert_eq!(response.source, ResponseSource::Upstream);
    }

    #[tokio::test]
    async fn test_route_once_then_falls_through() {
        let engine = InterceptionEngine::new();
        let upstream = upstream_returning(1, 200, b"real".to_vec());
        engine
            .route_once("**/api/tags", RouteHandler::fulfill(StaticResponse::new(200, "mocked")))
            .unwrap();

        let request = InterceptedRequest::get("https://api.test/api/tags");
        let first = engine.dispatch(&request, &upstream).await.unwrap();
        let second = engine.dispatch(&request, &upstream).await.unwrap();

        assert_eq!(first.body, b"mocked".to_vec());
        assert_eq!(second.body, b"real".to_vec());
        assert_eq!(engine.rule_count(), 0);
    }

    #[tokio::test]
    async fn test_limited_rule_retires_after_its_matches() {
        let engine = InterceptionEngine::new();
        let upstream = upstream_returning(1, 200, b"real".to_vec());
        engine.register_rule_times(
            UrlPattern::glob("**/api/tags").unwrap(),
            RouteHandler::fulfill(StaticResponse::new(200, "mocked")),
            NonZeroUsize::new(2).unwrap(),
        );

        let request = InterceptedRequest::get("https://api.test/api/tags");
        let bodies = [
            engine.dispatch(&request, &upstream).await.unwrap().body,
            engine.dispatch(&request, &upstream).await.unwrap().body,
        ];
        assert_eq!(bodies, [b"mocked".to_vec(), b"mocked".to_vec()]);
        assert_eq!(engine.rule_count(), 0);

        let third = engine.dispatch(&request, &upstream).await.unwrap();
        assert_eq!(third.body, b"real".to_vec());
    }

    #[tokio::test]
    async fn test_deregister() {
        let engine = InterceptionEngine::new();
        let handle = engine
            .route("**/api/tags", RouteHandler::abort(AbortReason::Failed))
            .unwrap();

        assert_eq!(engine.rule_count(), 1);
        assert!(handle.deregister());
        assert!(!handle.deregister());
        assert_eq!(engine.rule_count(), 0);
    }

    #[tokio::test]
    async fn test_rules_reevaluated_per_request() {
        let engine = InterceptionEngine::new();
        let upstream = upstream_returning(0, 200, Vec::new());
        engine
            .route("**/api/tags", RouteHandler::fulfill(StaticResponse::new(503, "")))
            .unwrap();

        let request = InterceptedRequest::get("https://api.test/api/tags");
        for _ in 0..2 {
            assert_eq!(engine.dispatch(&request, &upstream).await.unwrap().status, 503);
        }
    }

    #[tokio::test]
    async fn test_response_waiter_sees_later_response() {
        let engine = Arc::new(InterceptionEngine::new());
        engine
            .route("**/api/tags", RouteHandler::fulfill(StaticResponse::json(200, &json!({"tags": ["a"]}))))
            .unwrap();

        let waiter = engine.response_waiter(UrlPattern::glob("**/api/tags").unwrap());
        let dispatcher = {
            let engine = engine.clone();
            tokio::spawn(async move {
                let upstream = MockUpstream::new();
                engine
                    .dispatch(&InterceptedRequest::get("https://api.test/api/tags"), &upstream)
                    .await
            })
        };

        let observed = waiter.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(observed.url, "https://api.test/api/tags");
        dispatcher.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_response_waiter_times_out() {
        let engine = InterceptionEngine::new();
        let err = engine
            .wait_for_response(UrlPattern::glob("**/api/tags").unwrap(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, InterceptError::Timeout { .. }));
    }
}
