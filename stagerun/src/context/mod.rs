//! Execution contexts.
//!
//! A [`RunEnvironment`] carries the services of one run. Each stage attempt
//! receives a [`StageContext`] built from it plus a fresh automation session.

mod environment;
mod identity;
mod stage;

pub use environment::RunEnvironment;
pub use identity::RunIdentity;
pub use stage::StageContext;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::core::StageKind;
    use crate::errors::ArtifactError;
    use crate::events::CollectingEventSink;
    use crate::session::{HeadlessSessionFactory, SessionFactory};
    use crate::testing::CountingUpstream;
    use serde_json::json;
    use std::sync::Arc;

    async fn context(sink: Arc<CollectingEventSink>) -> StageContext {
        let factory = Arc::new(HeadlessSessionFactory::new(Arc::new(CountingUpstream::ok())));
        let session = factory.new_session("consumer").await.unwrap();
        let env = RunEnvironment::new(RunConfig::default(), factory).with_event_sink(sink);
        StageContext::new(env, "consumer", StageKind::Ordinary, 1, session)
    }

    #[tokio::test]
    async fn test_emit_tags_stage_and_run() {
        let sink = Arc::new(CollectingEventSink::new());
        let ctx = context(sink.clone()).await;
        ctx.emit("custom.event", Some(json!({"value": 1})));

        let events = sink.events();
        let data = events[0].1.as_ref().unwrap();
        assert_eq!(data["stage"], "consumer");
        assert_eq!(data["attempt"], 1);
        assert_eq!(data["run_id"], ctx.identity().run_id.to_string());
    }

    #[tokio::test]
    async fn test_require_artifact_names_missing_key() {
        let ctx = context(Arc::new(CollectingEventSink::new())).await;
        let err = ctx.require_artifact_str("slugId").await.unwrap_err();
        assert!(matches!(err, ArtifactError::Missing { ref key } if key == "slugId"));
        assert!(err.to_string().contains("slugId"));

        ctx.artifacts()
            .put("producer", "slugId", json!("s1"))
            .await
            .unwrap();
        assert_eq!(ctx.require_artifact_str("slugId").await.unwrap(), "s1");
    }
}
