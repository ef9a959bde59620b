//! End-to-end scheduler tests over real graphs.

use super::{PipelineBuilder, StageSpec};
use crate::cancellation::CancellationToken;
use crate::context::StageContext;
use crate::core::{StageKind, StageOutput, StageStatus};
use crate::session::Cookie;
use crate::stages::{AsyncFnStage, FnStage, Stage};
use crate::testing::{
    ConcurrencyGauge, ExecutionLog, FailingStage, PanickingStage, RecordingStage, SlowStage,
    TestEnvironment,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn recording(name: &str, log: &ExecutionLog) -> Arc<dyn Stage> {
    Arc::new(RecordingStage::new(name, log))
}

#[tokio::test]
async fn test_single_worker_follows_plan() {
    let log = ExecutionLog::new();
    let graph = PipelineBuilder::new("chain")
        .stage("publish", recording("publish", &log), &["build"])
        .stage("build", recording("build", &log), &["fetch"])
        .stage("fetch", recording("fetch", &log), &[])
        .stage("lint", recording("lint", &log), &[])
        .build()
        .unwrap();

    let report = graph.execute(&TestEnvironment::new().with_workers(1).build()).await;

    assert_eq!(log.entries(), graph.plan().iter().map(ToString::to_string).collect::<Vec<_>>());
    // Ready stages start in declaration order: once fetch is done, build
    // (declared second) goes ahead of lint (declared last).
    assert_eq!(graph.plan(), vec!["fetch", "build", "publish", "lint"]);
    assert!(report.success());
    assert_eq!(report.completion_order(), graph.plan());
}

#[tokio::test]
async fn test_worker_bound_is_respected() {
    let gauge = ConcurrencyGauge::new();
    let builder = (0..6).fold(PipelineBuilder::new("wide"), |builder, i| {
        let name = format!("s{i}");
        let stage: Arc<dyn Stage> = Arc::new(SlowStage::with_delay_ms(&name, 20).with_gauge(&gauge));
        builder.stage(name, stage, &[])
    });
    let graph = builder.build().unwrap();

    let report = graph.execute(&TestEnvironment::new().with_workers(2).build()).await;

    assert_eq!(report.with_status(StageStatus::Passed).len(), 6);
    assert!(gauge.peak() <= 2, "peak concurrency was {}", gauge.peak());
    assert!(gauge.peak() >= 1);
}

#[tokio::test]
async fn test_dependents_wait_for_prerequisites_with_many_workers() {
    let log = ExecutionLog::new();
    let graph = PipelineBuilder::new("diamond")
        .stage("root", Arc::new(SlowStage::with_delay_ms("root", 10)), &[])
        .stage("left", recording("left", &log), &["root"])
        .stage("right", recording("right", &log), &["root"])
        .stage("join", recording("join", &log), &["left", "right"])
        .build()
        .unwrap();

    let report = graph.execute(&TestEnvironment::new().with_workers(4).build()).await;

    assert!(report.success());
    assert_eq!(log.position("join"), Some(2));
    assert_eq!(report.completion_order()[0], "root");
    assert_eq!(report.completion_order()[3], "join");
}

#[tokio::test]
async fn test_failure_skips_transitive_dependents_with_root_cause() {
    let log = ExecutionLog::new();
    let graph = PipelineBuilder::new("broken")
        .stage("login", Arc::new(FailingStage::new("login", "401 from API")), &[])
        .stage("create", recording("create", &log), &["login"])
        .stage("verify", recording("verify", &log), &["create"])
        .stage("independent", recording("independent", &log), &[])
        .build()
        .unwrap();

    let report = graph.execute(&TestEnvironment::new().build()).await;

    assert_eq!(report.status("login"), Some(StageStatus::Failed));
    assert_eq!(report.record("login").unwrap().error.as_deref(), Some("401 from API"));

    let create = report.record("create").unwrap();
    assert_eq!(create.status, StageStatus::Skipped);
    assert_eq!(create.blocked_by.as_deref(), Some("login"));
    assert_eq!(create.attempts, 0);

    let verify = report.record("verify").unwrap();
    assert_eq!(verify.blocked_by.as_deref(), Some("login"));
    assert!(verify.skip_reason.as_deref().unwrap().contains("'create'"));

    assert_eq!(log.entries(), vec!["independent".to_string()]);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_teardown_runs_once_after_every_dependent() {
    let log = ExecutionLog::new();
    let graph = PipelineBuilder::new("lifecycle")
        .setup("create", recording("create", &log), &[])
        .stage("like", Arc::new(SlowStage::with_delay_ms("like", 15)), &["create"])
        .stage("edit", Arc::new(FailingStage::new("edit", "assertion failed")), &["create"])
        .stage("share", recording("share", &log), &["like"])
        .teardown("delete", recording("delete", &log), "create")
        .build()
        .unwrap();

    let report = graph.execute(&TestEnvironment::new().with_workers(3).build()).await;

    assert_eq!(log.count("delete"), 1);
    assert_eq!(log.entries().last().map(String::as_str), Some("delete"));
    assert_eq!(report.completion_order().last(), Some(&"delete"));
    assert_eq!(report.status("delete"), Some(StageStatus::Passed));
    assert_eq!(report.status("edit"), Some(StageStatus::Failed));
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_teardown_skipped_when_setup_fails() {
    let log = ExecutionLog::new();
    let graph = PipelineBuilder::new("no-setup")
        .setup("create", Arc::new(FailingStage::new("create", "quota exceeded")), &[])
        .stage("use", recording("use", &log), &["create"])
        .teardown("delete", recording("delete", &log), "create")
        .build()
        .unwrap();

    let report = graph.execute(&TestEnvironment::new().build()).await;

    let teardown = report.record("delete").unwrap();
    assert_eq!(teardown.status, StageStatus::Skipped);
    assert_eq!(teardown.kind, StageKind::Teardown);
    assert!(teardown.skip_reason.as_deref().unwrap().starts_with("setup 'create'"));
    assert!(log.entries().is_empty());
}

#[tokio::test]
async fn test_teardown_failure_fails_run_and_emits_event() {
    let fixture = TestEnvironment::new();
    let graph = PipelineBuilder::new("bad-cleanup")
        .setup("create", Arc::new(RecordingStage::new("create", &ExecutionLog::new())), &[])
        .teardown("delete", Arc::new(FailingStage::new("delete", "404 on delete")), "create")
        .build()
        .unwrap();

    let report = graph.execute(&fixture.build()).await;

    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.teardown_failures().len(), 1);
    let events = fixture.events().events_of_type("teardown.failed");
    assert_eq!(events.len(), 1);
    let data = events[0].1.as_ref().unwrap();
    assert_eq!(data["stage"], "delete");
    assert_eq!(data["setup"], "create");
}

#[tokio::test]
async fn test_retry_gets_a_fresh_session() {
    let log = ExecutionLog::new();
    let seen = log.clone();
    let flaky = FnStage::new("flaky", move |ctx: &StageContext| {
        seen.record(ctx.session().id());
        if ctx.attempt() == 1 {
            StageOutput::failed("element not found")
        } else {
            StageOutput::passed()
        }
    });
    let graph = PipelineBuilder::new("retry")
        .stage("flaky", Arc::new(flaky), &[])
        .build()
        .unwrap();
    let fixture = TestEnvironment::new().with_retries(1);

    let report = graph.execute(&fixture.build()).await;

    let record = report.record("flaky").unwrap();
    assert_eq!(record.status, StageStatus::Passed);
    assert_eq!(record.attempts, 2);
    let sessions = log.entries();
    assert_eq!(sessions.len(), 2);
    assert_ne!(sessions[0], sessions[1]);
    assert_eq!(fixture.events().events_of_type("stage.retry").len(), 1);
}

#[tokio::test]
async fn test_retries_exhausted_reports_last_error() {
    let stage = Arc::new(FailingStage::new("always", "still broken"));
    let graph = PipelineBuilder::new("exhausted")
        .stage("always", stage.clone(), &[])
        .build()
        .unwrap();

    let report = graph.execute(&TestEnvironment::new().with_retries(2).build()).await;

    let record = report.record("always").unwrap();
    assert_eq!(record.status, StageStatus::Failed);
    assert_eq!(record.attempts, 3);
    assert_eq!(stage.calls(), 3);
}

#[tokio::test]
async fn test_stage_timeout_is_a_failure() {
    let graph = PipelineBuilder::new("deadline")
        .add(
            StageSpec::new("hang", Arc::new(SlowStage::new("hang", Duration::from_secs(5))))
                .with_timeout(Duration::from_millis(20)),
        )
        .stage("after", Arc::new(RecordingStage::new("after", &ExecutionLog::new())), &["hang"])
        .build()
        .unwrap();

    let report = graph.execute(&TestEnvironment::new().build()).await;

    let hang = report.record("hang").unwrap();
    assert_eq!(hang.status, StageStatus::Failed);
    assert!(hang.error.as_deref().unwrap().contains("timed out after 20ms"));
    assert_eq!(report.record("after").unwrap().blocked_by.as_deref(), Some("hang"));
}

#[tokio::test]
async fn test_cancellation_skips_unstarted_but_runs_teardown() {
    let log = ExecutionLog::new();
    let token = Arc::new(CancellationToken::new());
    let trigger = token.clone();
    let cancel = FnStage::new("interrupt", move |_ctx: &StageContext| {
        trigger.cancel("operator abort");
        StageOutput::passed()
    });

    let graph = PipelineBuilder::new("cancelled")
        .setup("create", recording("create", &log), &[])
        .stage("interrupt", Arc::new(cancel), &["create"])
        .stage("later", recording("later", &log), &["interrupt"])
        .teardown("delete", recording("delete", &log), "create")
        .build()
        .unwrap();
    let env = TestEnvironment::new().with_workers(1).build().with_cancellation(token);

    let report = graph.execute(&env).await;

    assert!(report.cancelled);
    assert_eq!(report.exit_code(), 1);
    let later = report.record("later").unwrap();
    assert_eq!(later.status, StageStatus::Skipped);
    assert!(later.skip_reason.as_deref().unwrap().contains("operator abort"));
    assert_eq!(report.status("delete"), Some(StageStatus::Passed));
    assert_eq!(log.entries(), vec!["create".to_string(), "delete".to_string()]);
}

#[tokio::test]
async fn test_panic_is_recorded_as_failure() {
    let log = ExecutionLog::new();
    let graph = PipelineBuilder::new("panics")
        .stage("boom", Arc::new(PanickingStage::new("boom")), &[])
        .stage("after", recording("after", &log), &["boom"])
        .stage("other", recording("other", &log), &[])
        .build()
        .unwrap();

    let report = graph.execute(&TestEnvironment::new().build()).await;

    let boom = report.record("boom").unwrap();
    assert_eq!(boom.status, StageStatus::Failed);
    assert!(boom.error.as_deref().unwrap().contains("panicked"));
    assert_eq!(report.status("after"), Some(StageStatus::Skipped));
    assert_eq!(log.entries(), vec!["other".to_string()]);
}

#[tokio::test]
async fn test_artifact_handed_to_dependent() {
    let log = ExecutionLog::new();
    let seen = log.clone();
    let producer = RecordingStage::new("create", &ExecutionLog::new())
        .with_output(StageOutput::passed_with("slugId", json!("how-to-train-your-dragon")));
    let consumer = AsyncFnStage::new("like", move |ctx: StageContext| {
        let seen = seen.clone();
        async move {
            let slug = ctx.require_artifact_str("slugId").await?;
            seen.record(slug);
            Ok::<_, anyhow::Error>(StageOutput::passed())
        }
    });

    let graph = PipelineBuilder::new("handoff")
        .stage("create", Arc::new(producer), &[])
        .stage("like", Arc::new(consumer), &["create"])
        .build()
        .unwrap();
    let env = TestEnvironment::new().build();

    let report = graph.execute(&env).await;

    assert!(report.success());
    assert_eq!(log.entries(), vec!["how-to-train-your-dragon".to_string()]);
    assert_eq!(report.record("create").unwrap().artifacts, vec!["slugId".to_string()]);
    let stored = env.artifacts().get("slugId").await.unwrap().unwrap();
    assert_eq!(stored.producer, "create");
}

#[tokio::test]
async fn test_missing_artifact_fails_consumer() {
    let consumer = AsyncFnStage::new("like", |ctx: StageContext| async move {
        ctx.require_artifact_str("slugId").await?;
        Ok::<_, anyhow::Error>(StageOutput::passed())
    });
    let graph = PipelineBuilder::new("orphan")
        .stage("like", Arc::new(consumer), &[])
        .build()
        .unwrap();

    let report = graph.execute(&TestEnvironment::new().build()).await;

    let record = report.record("like").unwrap();
    assert_eq!(record.status, StageStatus::Failed);
    assert!(record.error.as_deref().unwrap().contains("slugId"));
}

#[tokio::test]
async fn test_artifact_conflict_fails_second_producer() {
    let output = StageOutput::passed_with("slugId", json!("a"));
    let graph = PipelineBuilder::new("conflict")
        .stage(
            "first",
            Arc::new(RecordingStage::new("first", &ExecutionLog::new()).with_output(output.clone())),
            &[],
        )
        .stage(
            "second",
            Arc::new(RecordingStage::new("second", &ExecutionLog::new()).with_output(output)),
            &["first"],
        )
        .build()
        .unwrap();

    let report = graph.execute(&TestEnvironment::new().build()).await;

    assert_eq!(report.status("first"), Some(StageStatus::Passed));
    let second = report.record("second").unwrap();
    assert_eq!(second.status, StageStatus::Failed);
    assert!(second.error.as_deref().unwrap().contains("could not be persisted"));
}

#[tokio::test]
async fn test_session_persisted_and_seeded() {
    let log = ExecutionLog::new();
    let seen = log.clone();
    let login = AsyncFnStage::new("login", |ctx: StageContext| async move {
        let mut state = ctx.session().storage_state().await;
        state.set_cookie(Cookie::new("sid", "abc123", "app.test"));
        state.set_local_storage("https://app.test", "jwtToken", "tok");
        ctx.session().load_storage_state(state).await;
        Ok::<_, anyhow::Error>(StageOutput::passed())
    });
    let reader = AsyncFnStage::new("reader", move |ctx: StageContext| {
        let seen = seen.clone();
        async move {
            let state = ctx.session().storage_state().await;
            let sid = state.cookie("sid").map(|c| c.value.clone()).unwrap_or_default();
            let token = ctx
                .session()
                .local_storage("https://app.test", "jwtToken")
                .await
                .unwrap_or_default();
            seen.record(format!("{sid}/{token}"));
            Ok::<_, anyhow::Error>(StageOutput::passed())
        }
    });

    let graph = PipelineBuilder::new("auth")
        .add(StageSpec::setup("login", Arc::new(login)).with_persist_session(".auth/user.json"))
        .add(
            StageSpec::new("reader", Arc::new(reader))
                .with_dependency("login")
                .with_session_seed(".auth/user.json"),
        )
        .build()
        .unwrap();
    let env = TestEnvironment::new().build();

    let report = graph.execute(&env).await;

    assert!(report.success());
    assert_eq!(log.entries(), vec!["abc123/tok".to_string()]);
    let saved = env.session_store().restore(".auth/user.json").await.unwrap();
    assert_eq!(saved.cookie("sid").map(|c| c.value.as_str()), Some("abc123"));
}

#[tokio::test]
async fn test_missing_seed_fails_stage_without_running_body() {
    let log = ExecutionLog::new();
    let graph = PipelineBuilder::new("unseeded")
        .add(StageSpec::new("reader", recording("reader", &log)).with_session_seed(".auth/none.json"))
        .build()
        .unwrap();

    let report = graph.execute(&TestEnvironment::new().build()).await;

    let record = report.record("reader").unwrap();
    assert_eq!(record.status, StageStatus::Failed);
    assert!(record.error.as_deref().unwrap().contains("could not seed session"));
    assert!(log.entries().is_empty());
}

#[tokio::test]
async fn test_self_skip_does_not_fail_run() {
    let log = ExecutionLog::new();
    let graph = PipelineBuilder::new("optional")
        .stage(
            "mobile-only",
            Arc::new(
                RecordingStage::new("mobile-only", &log).with_output(StageOutput::skipped("desktop viewport")),
            ),
            &[],
        )
        .stage("follow-up", recording("follow-up", &log), &["mobile-only"])
        .build()
        .unwrap();

    let report = graph.execute(&TestEnvironment::new().build()).await;

    assert!(report.success());
    let follow = report.record("follow-up").unwrap();
    assert_eq!(follow.status, StageStatus::Skipped);
    assert_eq!(follow.blocked_by, None);
    assert_eq!(report.summary(), "0 passed, 0 failed, 2 skipped");
}

#[tokio::test]
async fn test_lifecycle_events() {
    let fixture = TestEnvironment::new();
    let graph = PipelineBuilder::new("events")
        .stage("a", Arc::new(RecordingStage::new("a", &ExecutionLog::new())), &[])
        .stage("b", Arc::new(FailingStage::new("b", "nope")), &["a"])
        .stage("c", Arc::new(RecordingStage::new("c", &ExecutionLog::new())), &["b"])
        .build()
        .unwrap();

    let env = fixture.build();
    graph.execute(&env).await;
    let events = fixture.events();

    assert_eq!(events.stages_for("stage.started"), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(events.stages_for("stage.passed"), vec!["a".to_string()]);
    assert_eq!(events.stages_for("stage.failed"), vec!["b".to_string()]);
    assert_eq!(events.stages_for("stage.skipped"), vec!["c".to_string()]);

    let completed = events.events_of_type("run.completed");
    let data = completed[0].1.as_ref().unwrap();
    assert_eq!(data["failed"], 1);
    assert_eq!(data["success"], false);
    assert_eq!(data["run_id"], env.identity().run_id.to_string());
}
