//! The Conduit suite: authentication, an article lifecycle and API mocks.
//!
//! ```text
//! authentication (setup)          -> .auth/authorizedUser.json
//! article-setup (setup)           -> slugId, articleTitle, .auth/user.json
//!   like-counter                  <- .auth/user.json, slugId, articleTitle
//!   delete-article (teardown)     <- .auth/user.json, slugId
//! ```

mod intercepts;
mod stages;


pub use intercepts::{mock_tags, rewrite_first_article, ARTICLES_ROUTE, TAGS_ROUTE};
pub use stages::{ArticleSetupStage, AuthenticationStage, DeleteArticleStage, LikeCounterStage};

use crate::config::RunConfig;
use crate::context::RunEnvironment;
use crate::errors::{ConfigurationError, StagerunError};
use crate::events::LoggingEventSink;
use crate::intercept::HttpUpstream;
use crate::pipeline::{PipelineBuilder, StageGraph, StageSpec};
use crate::session::{ArtifactStore, FileSessionStore, HeadlessSessionFactory};
use std::sync::Arc;

/// Stage names.
pub const AUTHENTICATION: &str = "authentication";
/// Creates the article the other stages work on.
pub const ARTICLE_SETUP: &str = "article-setup";
/// Likes the setup article.
pub const LIKE_COUNTER: &str = "like-counter";
/// Deletes the setup article.
pub const DELETE_ARTICLE: &str = "delete-article";

/// Session key written by `authentication`.
pub const AUTHORIZED_USER_STATE: &str = "authorizedUser.json";
/// Session key written by `article-setup` and restored by its dependents.
pub const USER_STATE: &str = "user.json";
/// Artifact key of the setup article's slug.
pub const SLUG_ARTIFACT: &str = "slugId";
/// Artifact key of the setup article's title.
pub const TITLE_ARTIFACT: &str = "articleTitle";
/// Local storage entry holding the frontend's JWT.
pub const JWT_STORAGE_KEY: &str = "jwtToken";

/// Builds the suite graph.
pub fn conduit_pipeline() -> Result<StageGraph, ConfigurationError> {
    PipelineBuilder::new("conduit")
        .add(
            StageSpec::setup(AUTHENTICATION, Arc::new(AuthenticationStage))
                .with_persist_session(AUTHORIZED_USER_STATE),
        )
        .add(
            StageSpec::setup(ARTICLE_SETUP, Arc::new(ArticleSetupStage))
                .with_teardown(DELETE_ARTICLE)
                .with_persist_session(USER_STATE),
        )
        .add(
            StageSpec::new(DELETE_ARTICLE, Arc::new(DeleteArticleStage))
                .with_session_seed(USER_STATE),
        )
        .add(
            StageSpec::new(LIKE_COUNTER, Arc::new(LikeCounterStage))
                .with_dependency(ARTICLE_SETUP)
                .with_session_seed(USER_STATE),
        )
        .build()
}

/// Wires an environment for a real backend: HTTP sessions, session files
/// under `state_dir`, a fresh artifact file and events logged at info.
pub async fn conduit_environment(config: RunConfig) -> Result<RunEnvironment, StagerunError> {
    let upstream = HttpUpstream::new(config.navigation_timeout())?;
    let sessions = Arc::new(HeadlessSessionFactory::new(Arc::new(upstream)));
    let store = Arc::new(FileSessionStore::new(config.state_dir.clone()));
    let artifacts = Arc::new(ArtifactStore::fresh(config.artifacts_path()).await?);

    Ok(RunEnvironment::new(config, sessions)
        .with_session_store(store)
        .with_artifacts(artifacts)
        .with_event_sink(Arc::new(LoggingEventSink::default())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_conduit_graph_shape() {
        let graph = conduit_pipeline().unwrap();

        assert_eq!(graph.stage(DELETE_ARTICLE).unwrap().kind, StageKind::Teardown);
        assert_eq!(graph.teardown_for(ARTICLE_SETUP), Some(DELETE_ARTICLE));
        assert_eq!(
            graph.plan(),
            vec![AUTHENTICATION, ARTICLE_SETUP, LIKE_COUNTER, DELETE_ARTICLE]
        );
        assert!(graph.prerequisites_of(DELETE_ARTICLE).contains(&LIKE_COUNTER));
    }
}
