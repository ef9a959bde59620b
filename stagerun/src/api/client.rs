//! Typed client for the backend endpoints the suite consumes.

use super::models::{
    Article, ArticleEnvelope, ArticleList, ArticleQuery, ArticleUpdate, NewArticle, TagList, User,
    UserEnvelope, UserUpdate,
};
use super::AuthToken;
use crate::config::RunConfig;
use crate::errors::ApiError;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Calls the backend API, optionally authenticated with `Authorization: Token <token>`.
///
/// Slugs are appended as single percent-encoded path segments, so a slug can
/// never change which endpoint is called.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    api_root: Url,
    token: Option<AuthToken>,
}

impl ApiClient {
    /// Creates an anonymous client for `api_root` (base URL plus API prefix).
    pub fn new(api_root: &str, timeout: Duration) -> Result<Self, ApiError> {
        let invalid = |reason: String| ApiError::InvalidUrl {
            url: api_root.to_string(),
            reason,
        };
        let root = Url::parse(api_root).map_err(|err| invalid(err.to_string()))?;
        if root.cannot_be_a_base() {
            return Err(invalid("not a hierarchical URL".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            api_root: root,
            token: None,
        })
    }

    /// Creates an anonymous client from run configuration.
    pub fn from_config(config: &RunConfig) -> Result<Self, ApiError> {
        Self::new(&config.api_root(), config.action_timeout())
    }

    /// Returns a copy that authenticates every call with `token`.
    #[must_use]
    pub fn authenticated(&self, token: AuthToken) -> Self {
        Self {
            token: Some(token),
            ..self.clone()
        }
    }

    /// Returns the API root.
    #[must_use]
    pub fn api_root(&self) -> &str {
        self.api_root.as_str().trim_end_matches('/')
    }

    /// `POST /articles/`, expecting 201.
    pub async fn create_article(&self, article: &NewArticle) -> Result<Article, ApiError> {
        let body = ArticleEnvelope { article };
        let envelope: ArticleEnvelope<Article> = self
            .call_json(Method::POST, &["articles", ""], Some(&body), &[], 201)
            .await?;
        Ok(envelope.article)
    }

    /// `GET /articles/{slug}`, expecting 200.
    pub async fn get_article(&self, slug: &str) -> Result<Article, ApiError> {
        let envelope: ArticleEnvelope<Article> = self
            .call_json(Method::GET, &["articles", slug], None::<&()>, &[], 200)
            .await?;
        Ok(envelope.article)
    }

    /// `PUT /articles/{slug}`, expecting 200.
    pub async fn update_article(&self, slug: &str, update: &ArticleUpdate) -> Result<Article, ApiError> {
        let body = ArticleEnvelope { article: update };
        let envelope: ArticleEnvelope<Article> = self
            .call_json(Method::PUT, &["articles", slug], Some(&body), &[], 200)
            .await?;
        Ok(envelope.article)
    }

    /// `DELETE /articles/{slug}`, expecting exactly 204.
    pub async fn delete_article(&self, slug: &str) -> Result<(), ApiError> {
        self.call(Method::DELETE, &["articles", slug], None::<&()>, &[], 204)
            .await
            .map(|_| ())
    }

    /// `POST /articles/{slug}/favorite`, expecting 200.
    pub async fn favorite_article(&self, slug: &str) -> Result<Article, ApiError> {
        let envelope: ArticleEnvelope<Article> = self
            .call_json(Method::POST, &["articles", slug, "favorite"], None::<&()>, &[], 200)
            .await?;
        Ok(envelope.article)
    }

    /// `DELETE /articles/{slug}/favorite`, expecting 200.
    pub async fn unfavorite_article(&self, slug: &str) -> Result<Article, ApiError> {
        let envelope: ArticleEnvelope<Article> = self
            .call_json(Method::DELETE, &["articles", slug, "favorite"], None::<&()>, &[], 200)
            .await?;
        Ok(envelope.article)
    }

    /// `GET /articles`, expecting 200.
    pub async fn list_articles(&self, query: &ArticleQuery) -> Result<ArticleList, ApiError> {
        self.call_json(Method::GET, &["articles"], None::<&()>, &query.to_pairs(), 200)
            .await
    }

    /// `GET /tags`, expecting 200.
    pub async fn list_tags(&self) -> Result<Vec<String>, ApiError> {
        let tags: TagList = self
            .call_json(Method::GET, &["tags"], None::<&()>, &[], 200)
            .await?;
        Ok(tags.tags)
    }

    /// `PUT /user`, expecting 200.
    pub async fn update_user(&self, update: &UserUpdate) -> Result<User, ApiError> {
        let body = UserEnvelope { user: update };
        let envelope: UserEnvelope<User> = self
            .call_json(Method::PUT, &["user"], Some(&body), &[], 200)
            .await?;
        Ok(envelope.user)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.api_root.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl {
                url: self.api_root.to_string(),
                reason: "not a hierarchical URL".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn call_json<B, T>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
        query: &[(&str, String)],
        expected: u16,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let (path, text) = self.call(method, segments, body, query, expected).await?;
        serde_json::from_str(&text).map_err(|err| ApiError::Decode {
            path,
            reason: err.to_string(),
        })
    }

    async fn call<B>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
        query: &[(&str, String)],
        expected: u16,
    ) -> Result<(String, String), ApiError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.endpoint(segments)?;
        let path = url.path().to_string();
        let mut request = self.client.request(method.clone(), url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = &self.token {
            request = request.header(reqwest::header::AUTHORIZATION, token.header_value());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;

        debug!(%method, path = %path, status, "API call");
        if status != expected {
            return Err(ApiError::UnexpectedStatus {
                method: method.to_string(),
                path,
                status,
                expected,
                body: text,
            });
        }
        Ok((path, text))
    }
}
