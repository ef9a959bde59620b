//! Stage graph building and execution.
//!
//! This module provides:
//! - Stage declarations with setup and teardown roles
//! - A builder that validates the whole graph up front
//! - The scheduler that runs a graph with a bounded number of workers
//! - The run report

mod builder;
mod dag;
mod report;
mod spec;

#[cfg(test)]
mod integration_tests;

pub use builder::PipelineBuilder;
pub use dag::StageGraph;
pub use report::{RunReport, StageRecord};
pub use spec::StageSpec;
