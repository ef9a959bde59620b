//! # Stagerun
//!
//! Dependency-ordered execution of end-to-end test stages.
//!
//! Stagerun runs a graph of test stages against a web application and its
//! backend API, with support for:
//!
//! - **Stage graphs**: dependencies, setup stages and paired teardowns that
//!   run exactly once after everything that used the setup
//! - **Session handoff**: authenticated session state saved by one stage and
//!   restored into the fresh session of another
//! - **Artifacts**: small values such as a created article's slug passed
//!   between stages through a durable store
//! - **Request interception**: static responses, pass-through-mutate and
//!   aborts for requests made by an automation session
//! - **Backend API client**: token login and the Conduit article endpoints
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagerun::prelude::*;
//!
//! let graph = PipelineBuilder::new("articles")
//!     .setup("create-article", Arc::new(CreateArticle), &[])
//!     .stage("like-article", Arc::new(LikeArticle), &["create-article"])
//!     .teardown("delete-article", Arc::new(DeleteArticle), "create-article")
//!     .build()?;
//!
//! let report = graph.execute(&env).await;
//! std::process::exit(report.exit_code());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod api;
pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod intercept;
pub mod observability;
pub mod pipeline;
pub mod session;
pub mod stages;
pub mod suite;
pub mod testdata;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::api::{ApiClient, AuthToken, AuthTokenService, Credentials};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::RunConfig;
    pub use crate::context::{RunEnvironment, RunIdentity, StageContext};
    pub use crate::core::{StageArtifact, StageKind, StageOutput, StageStatus};
    pub use crate::errors::{
        ApiError, ArtifactError, AuthError, ConfigurationError, ErrorInfo, InterceptError,
        SessionStoreError, StagerunError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::intercept::{
        AbortReason, InterceptedRequest, InterceptedResponse, InterceptionEngine, RouteHandler,
        StaticResponse, UrlPattern,
    };
    pub use crate::pipeline::{PipelineBuilder, RunReport, StageGraph, StageRecord, StageSpec};
    pub use crate::session::{
        ArtifactStore, AutomationSession, FileSessionStore, InMemorySessionStore, SessionFactory,
        SessionState, SessionStore,
    };
    pub use crate::stages::{AsyncFnStage, FnStage, Stage};
    pub use crate::utils::{generate_uuid, iso_timestamp};
    pub use std::sync::Arc;
}
