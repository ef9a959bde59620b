//! Validated stage graph and its scheduler.
//!
//! Every stage keeps a count of prerequisites that are not yet terminal.
//! When a stage reaches a terminal status the counts of the stages waiting
//! on it are decremented; a stage at zero is released and then decides
//! whether to run or to skip. Ready stages are taken in declaration order.

use super::report::{RunReport, StageRecord};
use super::StageSpec;
use crate::context::{RunEnvironment, StageContext};
use crate::core::{StageKind, StageOutput, StageStatus};
use crate::errors::StagerunError;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// A validated, acyclic graph of stages. Build one with [`super::PipelineBuilder`].
#[derive(Debug)]
pub struct StageGraph {
    name: String,
    stages: Vec<StageSpec>,
    index: HashMap<String, usize>,
    prerequisites: Vec<Vec<usize>>,
    waiters: Vec<Vec<usize>>,
    order: Vec<usize>,
}

enum Admission {
    Run,
    Skip {
        reason: String,
        blocked_by: Option<String>,
    },
}

impl StageGraph {
    pub(crate) fn new(
        name: String,
        stages: Vec<StageSpec>,
        index: HashMap<String, usize>,
        prerequisites: Vec<Vec<usize>>,
    ) -> Self {
        let mut waiters = vec![Vec::new(); stages.len()];
        for (stage, prereqs) in prerequisites.iter().enumerate() {
            for &prereq in prereqs {
                waiters[prereq].push(stage);
            }
        }
        let order = kahn_order(&prerequisites, &waiters);

        Self {
            name,
            stages,
            index,
            prerequisites,
            waiters,
            order,
        }
    }

    /// Returns the graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the declaration of `name`.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Returns the teardown paired with `setup`.
    #[must_use]
    pub fn teardown_for(&self, setup: &str) -> Option<&str> {
        self.stages
            .iter()
            .find(|spec| spec.teardown_of.as_deref() == Some(setup))
            .map(|spec| spec.name.as_str())
    }

    /// Stages that must be terminal before `name` is released, including
    /// the synthetic edges of teardowns.
    #[must_use]
    pub fn prerequisites_of(&self, name: &str) -> Vec<&str> {
        self.index
            .get(name)
            .map(|&i| {
                self.prerequisites[i]
                    .iter()
                    .map(|&p| self.stages[p].name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The sequential execution order, without running anything.
    ///
    /// With one worker stages start in exactly this order.
    #[must_use]
    pub fn plan(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.stages[i].name.as_str()).collect()
    }

    /// Runs every stage and returns the report.
    ///
    /// Stage failures, timeouts and panics are recorded, never returned.
    pub async fn execute(&self, env: &RunEnvironment) -> RunReport {
        let started = Instant::now();
        let config = env.config().clone();
        let workers = config.workers.max(1);
        info!(
            graph = %self.name,
            run_id = %env.identity().run_id,
            stages = self.stages.len(),
            workers,
            "Starting run"
        );

        let mut pending: Vec<usize> = self.prerequisites.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.stages.len()).filter(|&i| pending[i] == 0).collect();
        let mut statuses: Vec<Option<(StageStatus, Option<String>)>> = vec![None; self.stages.len()];
        let mut records = Vec::with_capacity(self.stages.len());
        let mut running: FuturesUnordered<BoxFuture<'static, (usize, StageRecord)>> = FuturesUnordered::new();
        let mut cancelled = false;

        loop {
            while let Some(idx) = ready.first().copied() {
                let spec = &self.stages[idx];
                match self.admission(idx, &statuses, env) {
                    Admission::Skip { reason, blocked_by } => {
                        ready.remove(&idx);
                        cancelled |= env.cancellation().is_cancelled() && spec.kind != StageKind::Teardown;
                        info!(stage = %spec.name, reason = %reason, "Skipping stage");
                        env.emit(
                            "stage.skipped",
                            Some(json!({"stage": &spec.name, "reason": &reason, "blocked_by": &blocked_by})),
                        );
                        let record = StageRecord::skipped(&spec.name, spec.kind, reason, blocked_by);
                        self.complete(idx, &record, &mut statuses, &mut pending, &mut ready);
                        records.push(record);
                    }
                    Admission::Run => {
                        if running.len() >= workers {
                            break;
                        }
                        ready.remove(&idx);
                        running.push(spawn_stage(spec.clone(), env.clone(), config.retries, idx));
                    }
                }
            }

            let Some((idx, record)) = running.next().await else {
                break;
            };
            self.complete(idx, &record, &mut statuses, &mut pending, &mut ready);
            records.push(record);
        }

        let report = RunReport {
            run_id: env.identity().run_id,
            graph: self.name.clone(),
            records,
            cancelled,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        };
        for failure in report.teardown_failures() {
            warn!(stage = %failure.name, error = ?failure.error, "Teardown failed");
        }
        info!(graph = %self.name, summary = %report.summary(), "Run completed");
        env.emit(
            "run.completed",
            Some(json!({
                "graph": &self.name,
                "passed": report.with_status(StageStatus::Passed).len(),
                "failed": report.with_status(StageStatus::Failed).len(),
                "skipped": report.with_status(StageStatus::Skipped).len(),
                "success": report.success(),
            })),
        );
        report
    }

    /// Decides whether a released stage runs.
    fn admission(
        &self,
        idx: usize,
        statuses: &[Option<(StageStatus, Option<String>)>],
        env: &RunEnvironment,
    ) -> Admission {
        let spec = &self.stages[idx];

        let mut gates: Vec<&str> = Vec::new();
        if let Some(setup) = &spec.teardown_of {
            gates.push(setup);
        }
        gates.extend(spec.dependencies.iter().map(String::as_str));

        for gate in gates {
            let Some(&gate_idx) = self.index.get(gate) else {
                continue;
            };
            match &statuses[gate_idx] {
                Some((StageStatus::Passed, _)) => {}
                Some((status, root)) => {
                    let blocked_by = match status {
                        StageStatus::Failed => Some(gate.to_string()),
                        _ => root.clone(),
                    };
                    let what = if spec.teardown_of.as_deref() == Some(gate) {
                        "setup"
                    } else {
                        "dependency"
                    };
                    return Admission::Skip {
                        reason: format!("{what} '{gate}' {status}"),
                        blocked_by,
                    };
                }
                None => {
                    return Admission::Skip {
                        reason: format!("dependency '{gate}' never completed"),
                        blocked_by: None,
                    };
                }
            }
        }

        if spec.kind != StageKind::Teardown && env.cancellation().is_cancelled() {
            let reason = env.cancellation().reason().unwrap_or_default();
            return Admission::Skip {
                reason: format!("run cancelled: {reason}"),
                blocked_by: None,
            };
        }
        Admission::Run
    }

    /// Records a terminal status and releases stages whose prerequisites are all terminal.
    fn complete(
        &self,
        idx: usize,
        record: &StageRecord,
        statuses: &mut [Option<(StageStatus, Option<String>)>],
        pending: &mut [usize],
        ready: &mut BTreeSet<usize>,
    ) {
        statuses[idx] = Some((record.status, record.blocked_by.clone()));
        for &waiter in &self.waiters[idx] {
            pending[waiter] = pending[waiter].saturating_sub(1);
            if pending[waiter] == 0 {
                debug!(stage = %self.stages[waiter].name, "Stage released");
                ready.insert(waiter);
            }
        }
    }
}

fn kahn_order(prerequisites: &[Vec<usize>], waiters: &[Vec<usize>]) -> Vec<usize> {
    let mut pending: Vec<usize> = prerequisites.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = (0..pending.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(pending.len());

    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for &waiter in &waiters[idx] {
            pending[waiter] -= 1;
            if pending[waiter] == 0 {
                ready.insert(waiter);
            }
        }
    }
    order
}

fn spawn_stage(
    spec: StageSpec,
    env: RunEnvironment,
    retries: u32,
    idx: usize,
) -> BoxFuture<'static, (usize, StageRecord)> {
    let name = spec.name.clone();
    let kind = spec.kind;
    let span = info_span!("stage", stage = %name, kind = %kind);
    let handle = tokio::spawn(run_stage(spec, env, retries).instrument(span));

    async move {
        let record = match handle.await {
            Ok(record) => record,
            Err(err) => {
                warn!(stage = %name, error = %err, "Stage task panicked");
                StageRecord {
                    name,
                    kind,
                    status: StageStatus::Failed,
                    attempts: 1,
                    error: Some(format!("stage panicked: {err}")),
                    skip_reason: None,
                    blocked_by: None,
                    artifacts: Vec::new(),
                    duration_ms: 0.0,
                }
            }
        };
        (idx, record)
    }
    .boxed()
}

async fn run_stage(spec: StageSpec, env: RunEnvironment, retries: u32) -> StageRecord {
    let started = Instant::now();
    info!("Stage started");
    env.emit(
        "stage.started",
        Some(json!({"stage": &spec.name, "kind": spec.kind})),
    );

    let mut attempts = 0;
    let output = loop {
        attempts += 1;
        let output = run_attempt(&spec, &env, attempts).await;
        if output.status != StageStatus::Failed || attempts > retries {
            break output;
        }
        warn!(attempt = attempts, error = ?output.error, "Stage attempt failed, retrying");
        env.emit(
            "stage.retry",
            Some(json!({"stage": &spec.name, "attempt": attempts, "error": &output.error})),
        );
    };

    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
    let mut record = StageRecord {
        name: spec.name.clone(),
        kind: spec.kind,
        status: output.status,
        attempts,
        error: output.error.clone(),
        skip_reason: output.skip_reason.clone(),
        blocked_by: None,
        artifacts: output.artifacts.keys().cloned().collect(),
        duration_ms,
    };

    match record.status {
        StageStatus::Passed => {
            info!(attempts, duration_ms, "Stage passed");
            env.emit(
                "stage.passed",
                Some(json!({"stage": &spec.name, "attempts": attempts, "duration_ms": duration_ms})),
            );
        }
        StageStatus::Skipped => {
            info!(reason = ?record.skip_reason, "Stage skipped itself");
            env.emit(
                "stage.skipped",
                Some(json!({"stage": &spec.name, "reason": &record.skip_reason})),
            );
        }
        _ => {
            record.status = StageStatus::Failed;
            warn!(attempts, error = ?record.error, "Stage failed");
            env.emit(
                "stage.failed",
                Some(json!({"stage": &spec.name, "attempts": attempts, "error": &record.error})),
            );
            if spec.kind == StageKind::Teardown {
                env.emit(
                    "teardown.failed",
                    Some(json!({"stage": &spec.name, "setup": &spec.teardown_of, "error": &record.error})),
                );
            }
        }
    }
    record
}

/// One attempt: fresh session, optional seed, body under deadline, then persistence.
async fn run_attempt(spec: &StageSpec, env: &RunEnvironment, attempt: u32) -> StageOutput {
    let session = match env.sessions().new_session(&spec.name).await {
        Ok(session) => session,
        Err(err) => return StageOutput::failed(format!("could not open session: {err}")),
    };

    if let Some(key) = &spec.session_seed {
        match env.session_store().restore(key).await {
            Ok(state) => session.load_storage_state(state).await,
            Err(err) => {
                session.close().await;
                return StageOutput::failed(format!("could not seed session: {err}"));
            }
        }
    }

    let ctx = StageContext::new(env.clone(), &spec.name, spec.kind, attempt, session.clone());
    let deadline = spec.timeout.unwrap_or_else(|| env.config().stage_timeout());
    let mut output = match tokio::time::timeout(deadline, spec.runner.execute(&ctx)).await {
        Ok(output) => output,
        Err(_) => StageOutput::failed(format!(
            "stage timed out after {}ms",
            deadline.as_millis()
        )),
    };

    if output.is_passed() {
        if let Err(err) = persist(spec, &ctx, &output).await {
            output = StageOutput::failed(format!("stage passed but its outputs could not be persisted: {err}"));
        }
    }

    session.close().await;
    output
}

async fn persist(spec: &StageSpec, ctx: &StageContext, output: &StageOutput) -> Result<(), StagerunError> {
    for (key, value) in &output.artifacts {
        ctx.artifacts().put(&spec.name, key, value.clone()).await?;
    }
    if let Some(key) = &spec.persist_session {
        let state = ctx.session().storage_state().await;
        ctx.session_store().save(key, &state).await?;
        debug!(key = %key, "Persisted session state");
    }
    Ok(())
}
