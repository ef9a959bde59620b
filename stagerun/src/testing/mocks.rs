//! Stage doubles for scheduler tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::StageContext;
use crate::core::StageOutput;
use crate::stages::Stage;

/// Shared, ordered log of stage executions.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecutionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Returns all entries in order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Returns the position of the first `entry`.
    #[must_use]
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    /// Returns how many times `entry` was recorded.
    #[must_use]
    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| *e == entry).count()
    }
}

/// Records its execution in an [`ExecutionLog`] and returns a fixed output.
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    log: ExecutionLog,
    output: StageOutput,
}

impl RecordingStage {
    /// Creates a passing recording stage.
    #[must_use]
    pub fn new(name: impl Into<String>, log: &ExecutionLog) -> Self {
        Self {
            name: name.into(),
            log: log.clone(),
            output: StageOutput::passed(),
        }
    }

    /// Sets the output returned on every execution.
    #[must_use]
    pub fn with_output(mut self, output: StageOutput) -> Self {
        self.output = output;
        self
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        self.log.record(ctx.stage_name());
        self.output.clone()
    }
}

/// Fails a configurable number of times, then passes.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    error: String,
    failures: Option<usize>,
    calls: AtomicUsize,
}

impl FailingStage {
    /// Creates a stage that always fails.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
            failures: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Creates a stage that fails `failures` times and then passes.
    #[must_use]
    pub fn flaky(name: impl Into<String>, error: impl Into<String>, failures: usize) -> Self {
        Self {
            failures: Some(failures),
            ..Self::new(name, error)
        }
    }

    /// Number of executions so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures {
            Some(failures) if call >= failures => StageOutput::passed(),
            _ => StageOutput::failed(&self.error),
        }
    }
}

/// Tracks how many gauged stages run at the same time.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyGauge {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyGauge {
    /// Creates a gauge.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest number of simultaneously active stages observed.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Sleeps before passing.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
    gauge: Option<ConcurrencyGauge>,
}

impl SlowStage {
    /// Creates a slow stage.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            gauge: None,
        }
    }

    /// Creates a slow stage with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self::new(name, Duration::from_millis(ms))
    }

    /// Reports activity to `gauge`.
    #[must_use]
    pub fn with_gauge(mut self, gauge: &ConcurrencyGauge) -> Self {
        self.gauge = Some(gauge.clone());
        self
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
        tokio::time::sleep(self.delay).await;
        if let Some(gauge) = &self.gauge {
            gauge.exit();
        }
        StageOutput::passed()
    }
}

/// Panics when executed.
#[derive(Debug)]
pub struct PanickingStage {
    name: String,
}

impl PanickingStage {
    /// Creates a panicking stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for PanickingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        panic!("stage '{}' blew up", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::stage_context;

    #[tokio::test]
    async fn test_recording_stage() {
        let log = ExecutionLog::new();
        let stage = RecordingStage::new("a", &log);
        let output = stage.execute(&stage_context("a").await).await;

        assert!(output.is_passed());
        assert_eq!(log.entries(), vec!["a".to_string()]);
        assert_eq!(log.count("a"), 1);
    }

    #[tokio::test]
    async fn test_flaky_stage() {
        let stage = FailingStage::flaky("f", "transient", 2);
        let ctx = stage_context("f").await;

        assert!(stage.execute(&ctx).await.is_failed());
        assert!(stage.execute(&ctx).await.is_failed());
        assert!(stage.execute(&ctx).await.is_passed());
        assert_eq!(stage.calls(), 3);
    }

    #[tokio::test]
    async fn test_slow_stage_reports_to_gauge() {
        let gauge = ConcurrencyGauge::new();
        let stage = SlowStage::with_delay_ms("s", 1).with_gauge(&gauge);
        stage.execute(&stage_context("s").await).await;
        assert_eq!(gauge.peak(), 1);
    }
}
