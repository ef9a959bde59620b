//! The stage body trait and closure adapters.
//!
//! A stage body receives a [`StageContext`] and reports a [`StageOutput`].
//! Failures are values, not panics: a body that returns an error output is
//! recorded as failed and the run continues.

use crate::context::StageContext;
use crate::core::StageOutput;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// A unit of test work.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage body, used in logs.
    fn name(&self) -> &str;

    /// Runs one attempt.
    async fn execute(&self, ctx: &StageContext) -> StageOutput;
}

/// A stage backed by a synchronous closure.
pub struct FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    /// Creates a closure stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        (self.func)(ctx)
    }
}

/// A stage backed by an async closure returning `anyhow::Result`.
///
/// Errors become failed outputs carrying the full context chain.
pub struct AsyncFnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<StageOutput>> + Send,
{
    name: String,
    func: F,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<StageOutput>> + Send,
{
    /// Creates an async closure stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _future: PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<StageOutput>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> Stage for AsyncFnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<StageOutput>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        StageOutput::from_result((self.func)(ctx.clone()).await)
    }
}

/// A stage that passes without doing anything.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        StageOutput::passed()
    }
}
