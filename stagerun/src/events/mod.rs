//! Run lifecycle events.
//!
//! The scheduler publishes `stage.started`, `stage.passed`, `stage.failed`,
//! `stage.skipped`, `stage.retry`, `teardown.failed` and `run.completed`
//! through an [`EventSink`] supplied by the run environment.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
