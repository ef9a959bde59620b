//! Event sink trait and implementations.

use parking_lot::RwLock;
use tracing::{debug, info, Level};

/// Receives run lifecycle events.
///
/// Emission must never fail the run: implementations log and swallow
/// their own errors.
pub trait EventSink: Send + Sync {
    /// Emits an event.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "stage.started")
    /// * `data` - Optional event payload
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        let stage = data
            .as_ref()
            .and_then(|d| d.get("stage"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("-");
        if self.level == Level::DEBUG {
            debug!(event_type, stage, event_data = ?data, "Run event");
        } else {
            info!(event_type, stage, event_data = ?data, "Run event");
        }
    }
}

/// A collecting event sink for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<(String, Option<serde_json::Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<serde_json::Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Returns the `stage` field of every event of exactly `event_type`, in order.
    #[must_use]
    pub fn stages_for(&self, event_type: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t == event_type)
            .filter_map(|(_, data)| {
                data.as_ref()
                    .and_then(|d| d.get("stage"))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            })
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}
