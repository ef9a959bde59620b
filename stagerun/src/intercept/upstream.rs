//! The real backend that unmatched and pass-through requests are forwarded to.

use super::{InterceptedRequest, InterceptedResponse};
use crate::errors::InterceptError;
use async_trait::async_trait;
use reqwest::header::SET_COOKIE;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Sends a request to the real backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Forwards `request` and returns the backend's response.
    async fn send(&self, request: &InterceptedRequest) -> Result<InterceptedResponse, InterceptError>;
}

/// Forwards requests over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    /// Creates an upstream whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, InterceptError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| InterceptError::Upstream {
                url: String::new(),
                reason: err.to_string(),
            })?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, request: &InterceptedRequest) -> Result<InterceptedResponse, InterceptError> {
        let upstream_err = |err: reqwest::Error| InterceptError::Upstream {
            url: request.url.clone(),
            reason: err.to_string(),
        };

        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(upstream_err)?;
        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let set_cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok().map(str::to_string))
            .collect();
        let body = response.bytes().await.map_err(upstream_err)?.to_vec();

        debug!(method = %request.method, url = %request.url, status, cookies = set_cookies.len(), "Upstream response");
        Ok(InterceptedResponse {
            headers,
            set_cookies,
            ..InterceptedResponse::new(&request.url, status, body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_forwards_headers_and_keeps_every_set_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/user"))
            .and(header("authorization", "Token abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("set-cookie", "sid=abc; Path=/")
                    .append_header("set-cookie", "csrf=xyz; Path=/")
                    .set_body_string("{}"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let upstream = HttpUpstream::new(Duration::from_secs(5)).unwrap();
        let request = InterceptedRequest::get(format!("{}/api/user", server.uri()))
            .with_header("Authorization", "Token abc");
        let response = upstream.send(&request).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(
            response.set_cookie_headers(),
            ["sid=abc; Path=/", "csrf=xyz; Path=/"]
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_upstream_error() {
        let upstream = HttpUpstream::new(Duration::from_millis(200)).unwrap();
        let err = upstream
            .send(&InterceptedRequest::get("http://127.0.0.1:9/api/tags"))
            .await
            .unwrap_err();
        assert!(matches!(err, InterceptError::Upstream { .. }));
    }
}
