//! Test fixtures: a canned upstream and ready-made environments.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::RunConfig;
use crate::context::{RunEnvironment, StageContext};
use crate::core::StageKind;
use crate::errors::InterceptError;
use crate::events::CollectingEventSink;
use crate::intercept::{InterceptedRequest, InterceptedResponse, Upstream};
use crate::session::{HeadlessSession, HeadlessSessionFactory, SessionStore};

/// An upstream that answers every request with the same response and
/// remembers what it was sent.
#[derive(Debug)]
pub struct CountingUpstream {
    status: u16,
    body: String,
    headers: Vec<(String, String)>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl CountingUpstream {
    /// Answers `200 {}`.
    #[must_use]
    pub fn ok() -> Self {
        Self::with_response(200, "{}")
    }

    /// Answers `status` with `body`.
    #[must_use]
    pub fn with_response(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: Vec::new(),
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Adds a response header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    /// Number of requests received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// URLs received, in order.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl Upstream for CountingUpstream {
    async fn send(&self, request: &InterceptedRequest) -> Result<InterceptedResponse, InterceptError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(request.url.clone());
        let response = InterceptedResponse::new(&request.url, self.status, self.body.as_bytes())
            .with_header("content-type", "application/json");
        Ok(self
            .headers
            .iter()
            .fold(response, |response, (name, value)| response.with_header(name, value.clone())))
    }
}

/// Builds a [`RunEnvironment`] wired to in-memory stores and a collecting sink.
#[derive(Debug)]
pub struct TestEnvironment {
    config: RunConfig,
    upstream: Arc<CountingUpstream>,
    events: Arc<CollectingEventSink>,
    store: Option<Arc<dyn SessionStore>>,
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnvironment {
    /// Starts from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RunConfig::default(),
            upstream: Arc::new(CountingUpstream::ok()),
            events: Arc::new(CollectingEventSink::new()),
            store: None,
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the worker bound.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config = self.config.with_workers(workers);
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.config = self.config.with_retries(retries);
        self
    }

    /// Replaces the upstream sessions talk to.
    #[must_use]
    pub fn with_upstream(mut self, upstream: Arc<CountingUpstream>) -> Self {
        self.upstream = upstream;
        self
    }

    /// Replaces the session store.
    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The sink every event of the built environment lands in.
    #[must_use]
    pub fn events(&self) -> Arc<CollectingEventSink> {
        self.events.clone()
    }

    /// The shared upstream.
    #[must_use]
    pub fn upstream(&self) -> Arc<CountingUpstream> {
        self.upstream.clone()
    }

    /// Builds the environment.
    #[must_use]
    pub fn build(&self) -> RunEnvironment {
        let factory = Arc::new(HeadlessSessionFactory::new(self.upstream.clone()));
        let env = RunEnvironment::new(self.config.clone(), factory).with_event_sink(self.events.clone());
        match &self.store {
            Some(store) => env.with_session_store(store.clone()),
            None => env,
        }
    }
}

/// A context for running a stage body directly, outside any graph.
pub async fn stage_context(name: &str) -> StageContext {
    let fixture = TestEnvironment::new();
    let session = Arc::new(HeadlessSession::new(format!("{name}#direct"), fixture.upstream()));
    StageContext::new(fixture.build(), name, StageKind::Ordinary, 1, session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counting_upstream_records_urls() {
        let upstream = CountingUpstream::with_response(201, r#"{"ok":true}"#).with_header("X-Trace", "1");
        let response = upstream
            .send(&InterceptedRequest::get("https://api.test/tags"))
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.header("x-trace"), Some("1"));
        assert_eq!(upstream.calls(), 1);
        assert_eq!(upstream.urls(), vec!["https://api.test/tags".to_string()]);
    }

    #[tokio::test]
    async fn test_environment_applies_overrides() {
        let fixture = TestEnvironment::new().with_workers(3).with_retries(2);
        let env = fixture.build();
        assert_eq!(env.config().workers, 3);
        assert_eq!(env.config().retries, 2);

        env.emit("gauge", None);
        assert_eq!(fixture.events().len(), 1);
    }
}
