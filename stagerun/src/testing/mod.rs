//! Testing utilities for stage graphs.
//!
//! This module provides:
//! - Stage doubles that record, fail, sleep or panic
//! - A canned upstream for sessions
//! - Environment fixtures with a collecting event sink

mod fixtures;
mod mocks;

pub use fixtures::{stage_context, CountingUpstream, TestEnvironment};
pub use mocks::{
    ConcurrencyGauge, ExecutionLog, FailingStage, PanickingStage, RecordingStage, SlowStage,
};
