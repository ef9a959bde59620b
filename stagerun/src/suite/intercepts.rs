//! Interception helpers for the Conduit frontend's API calls.

use crate::errors::InterceptError;
use crate::intercept::{set_json_pointer, InterceptionEngine, RouteHandler, RuleHandle, StaticResponse};
use serde_json::json;

/// Glob of the tag list request.
pub const TAGS_ROUTE: &str = "**/api/tags";

/// Glob of article list requests, with or without a query string.
pub const ARTICLES_ROUTE: &str = "**/api/articles*";

/// Answers every tag list request with `tags`; the backend is never called.
pub fn mock_tags(engine: &InterceptionEngine, tags: &[&str]) -> Result<RuleHandle, InterceptError> {
    let body = json!({ "tags": tags });
    engine.route(TAGS_ROUTE, RouteHandler::fulfill(StaticResponse::json(200, &body)))
}

/// Fetches the real article list and replaces the title and description of
/// its first article.
///
/// A list with no articles fails the transform and is delivered unchanged.
pub fn rewrite_first_article(
    engine: &InterceptionEngine,
    title: impl Into<String>,
    description: impl Into<String>,
) -> Result<RuleHandle, InterceptError> {
    let title = title.into();
    let description = description.into();
    engine.route(
        ARTICLES_ROUTE,
        RouteHandler::mutate(move |mut body| {
            set_json_pointer(&mut body, "/articles/0/title", json!(title))?;
            set_json_pointer(&mut body, "/articles/0/description", json!(description))?;
            Ok(body)
        }),
    )
}
