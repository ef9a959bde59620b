//! Request and response values flowing through the interception engine.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

pub(crate) const SET_COOKIE: &str = "set-cookie";

/// An outgoing request issued by an automation session.
#[derive(Debug, Clone, PartialEq)]
pub struct InterceptedRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Headers, names lower-cased.
    pub headers: BTreeMap<String, String>,
    /// Request body.
    pub body: Option<Vec<u8>>,
}

impl InterceptedRequest {
    /// Creates a request with no headers or body.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Creates a GET request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Sets a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Sets a JSON body and content type.
    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_vec(body)?);
        self.headers
            .insert("content-type".to_string(), "application/json".to_string());
        Ok(self)
    }

    /// Returns a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Where a delivered response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Fabricated by a fulfill rule; the backend was not contacted.
    Fulfilled,
    /// Fetched from the backend and rewritten by a mutate rule.
    Mutated,
    /// Fetched from the backend and delivered unmodified.
    Upstream,
}

/// A response delivered back to the automation session.
#[derive(Debug, Clone, PartialEq)]
pub struct InterceptedResponse {
    /// URL of the request this answers.
    pub url: String,
    /// HTTP status.
    pub status: u16,
    /// Headers, names lower-cased. Repeated headers keep their last value.
    pub headers: BTreeMap<String, String>,
    /// Every `Set-Cookie` header, in order.
    pub set_cookies: Vec<String>,
    /// Response body.
    pub body: Vec<u8>,
    /// Origin of the response.
    pub source: ResponseSource,
}

impl InterceptedResponse {
    /// Creates an upstream response.
    #[must_use]
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: BTreeMap::new(),
            set_cookies: Vec::new(),
            body: body.into(),
            source: ResponseSource::Upstream,
        }
    }

    /// Sets a header. `Set-Cookie` values accumulate.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        if name == SET_COOKIE {
            self.set_cookies.push(value.clone());
        }
        self.headers.insert(name, value);
        self
    }

    /// Returns a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Returns every `Set-Cookie` header of the response.
    #[must_use]
    pub fn set_cookie_headers(&self) -> &[String] {
        &self.set_cookies
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the body as lossy UTF-8 text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}
