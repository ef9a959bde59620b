//! Core domain model types for stagerun.
//!
//! This module contains the fundamental types used throughout the framework:
//! - Stage status and kind enums
//! - Stage output type with factory methods
//! - Persisted stage artifacts

mod artifact;
mod output;
mod status;

pub use artifact::StageArtifact;
pub use output::StageOutput;
pub use status::{StageKind, StageStatus};
