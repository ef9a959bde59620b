//! Stage bodies of the Conduit suite.

use super::{JWT_STORAGE_KEY, SLUG_ARTIFACT, TAGS_ROUTE, TITLE_ARTIFACT};
use crate::api::{ApiClient, AuthToken, AuthTokenService, NewArticle};
use crate::context::StageContext;
use crate::core::StageOutput;
use crate::intercept::{InterceptedRequest, UrlPattern};
use crate::stages::Stage;
use crate::testdata::generate_test_data;
use anyhow::{ensure, Context};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

async fn login(ctx: &StageContext) -> anyhow::Result<AuthToken> {
    let service = AuthTokenService::from_config(ctx.config())?;
    let token = service
        .login(&ctx.config().credentials)
        .await
        .context("logging in with the configured user")?;
    Ok(token)
}

/// Stores the token where the frontend keeps it, so a saved session is
/// authenticated when restored.
async fn remember_token(ctx: &StageContext, token: &AuthToken) {
    let mut state = ctx.session().storage_state().await;
    state.set_local_storage(&ctx.config().origin(), JWT_STORAGE_KEY, token.as_str());
    ctx.session().load_storage_state(state).await;
}

async fn session_token(ctx: &StageContext) -> anyhow::Result<AuthToken> {
    let origin = ctx.config().origin();
    ctx.session()
        .local_storage(&origin, JWT_STORAGE_KEY)
        .await
        .map(AuthToken::new)
        .with_context(|| format!("session has no '{JWT_STORAGE_KEY}' for {origin}; was it seeded?"))
}

/// Logs in, waits for the authenticated tag list to load and keeps the
/// session state.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthenticationStage;

impl AuthenticationStage {
    async fn run(ctx: &StageContext) -> anyhow::Result<StageOutput> {
        let tags_loaded = ctx.interceptor().response_waiter(UrlPattern::glob(TAGS_ROUTE)?);

        let token = login(ctx).await?;
        remember_token(ctx, &token).await;

        let request = InterceptedRequest::get(ctx.config().api_url("/tags"))
            .with_header("authorization", token.header_value());
        ctx.session().fetch(request).await?;

        let response = tags_loaded
            .wait(ctx.config().navigation_timeout())
            .await
            .context("waiting for the tag list after login")?;
        ensure!(
            response.is_success(),
            "tag list request after login returned {}",
            response.status
        );
        let tags = response
            .json::<serde_json::Value>()
            .ok()
            .and_then(|body| body.get("tags").cloned())
            .unwrap_or_default();
        Ok(StageOutput::passed().with_metadata("tags", tags))
    }
}

#[async_trait]
impl Stage for AuthenticationStage {
    fn name(&self) -> &str {
        "authentication"
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        StageOutput::from_result(Self::run(ctx).await)
    }
}

/// Creates an article through the API and publishes its slug.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArticleSetupStage;

impl ArticleSetupStage {
    async fn run(ctx: &StageContext) -> anyhow::Result<StageOutput> {
        let token = login(ctx).await?;
        let client = ApiClient::from_config(ctx.config())?.authenticated(token.clone());

        let article = NewArticle::new(
            generate_test_data("title")?,
            generate_test_data("description")?,
            generate_test_data("body")?,
        );
        let created = client
            .create_article(&article)
            .await
            .context("creating the setup article")?;
        ensure!(
            created.title == article.title,
            "created article has title '{}', expected '{}'",
            created.title,
            article.title
        );
        info!(slug = %created.slug, "Created setup article");

        remember_token(ctx, &token).await;
        Ok(StageOutput::passed_with(SLUG_ARTIFACT, json!(created.slug))
            .with_artifact(TITLE_ARTIFACT, json!(created.title)))
    }
}

#[async_trait]
impl Stage for ArticleSetupStage {
    fn name(&self) -> &str {
        "article-setup"
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        StageOutput::from_result(Self::run(ctx).await)
    }
}

/// Finds the setup article with the restored session, likes it and checks
/// the counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct LikeCounterStage;

impl LikeCounterStage {
    async fn run(ctx: &StageContext) -> anyhow::Result<StageOutput> {
        let slug = ctx.require_artifact_str(SLUG_ARTIFACT).await?;
        let title = ctx.require_artifact_str(TITLE_ARTIFACT).await?;
        let token = session_token(ctx).await?;
        let client = ApiClient::from_config(ctx.config())?.authenticated(token);

        let article = client.get_article(&slug).await?;
        ensure!(
            article.title == title,
            "article '{slug}' has title '{}', expected '{title}'",
            article.title
        );
        let before = article.favorites_count;
        let liked = client.favorite_article(&slug).await?;
        ensure!(liked.favorited, "article '{slug}' is not marked as favorited");
        ensure!(
            liked.favorites_count > before,
            "like counter did not increase: {before} -> {}",
            liked.favorites_count
        );
        Ok(StageOutput::passed().with_metadata("favorites_count", json!(liked.favorites_count)))
    }
}

#[async_trait]
impl Stage for LikeCounterStage {
    fn name(&self) -> &str {
        "like-counter"
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        StageOutput::from_result(Self::run(ctx).await)
    }
}

/// Deletes the setup article, expecting `204`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteArticleStage;

impl DeleteArticleStage {
    async fn run(ctx: &StageContext) -> anyhow::Result<StageOutput> {
        let slug = ctx.require_artifact_str(SLUG_ARTIFACT).await?;
        let token = login(ctx).await?;
        ApiClient::from_config(ctx.config())?
            .authenticated(token)
            .delete_article(&slug)
            .await
            .with_context(|| format!("deleting article '{slug}'"))?;
        info!(slug = %slug, "Deleted setup article");
        Ok(StageOutput::passed())
    }
}

#[async_trait]
impl Stage for DeleteArticleStage {
    fn name(&self) -> &str {
        "delete-article"
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        StageOutput::from_result(Self::run(ctx).await)
    }
}
