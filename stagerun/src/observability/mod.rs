//! Log subscriber setup.
//!
//! Library code only emits `tracing` events. Binaries and test harnesses call
//! [`init_tracing`] once to decide where they go.

use crate::errors::ConfigurationError;
use std::str::FromStr;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default directive when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event, span fields included.
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "pretty" | "text" => Ok(Self::Pretty),
            "json" | "jsonl" => Ok(Self::Json),
            other => Err(ConfigurationError::invalid_setting(
                "LOG_FORMAT",
                format!("unknown log format '{other}', expected 'pretty' or 'json'"),
            )),
        }
    }
}

/// Builds the filter from `RUST_LOG`, falling back to `default`.
pub fn env_filter(default: &str) -> Result<EnvFilter, ConfigurationError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => parse_filter(&directives),
        _ => parse_filter(default),
    }
}

fn parse_filter(directives: &str) -> Result<EnvFilter, ConfigurationError> {
    EnvFilter::try_new(directives).map_err(|err| {
        ConfigurationError::invalid_setting(
            EnvFilter::DEFAULT_ENV,
            format!("invalid filter '{directives}': {err}"),
        )
    })
}

/// Installs the global subscriber.
///
/// Returns `Ok(false)` when a subscriber was already installed, which is
/// the normal case when several tests initialise logging.
pub fn init_tracing(format: LogFormat) -> Result<bool, ConfigurationError> {
    let filter = env_filter(DEFAULT_FILTER)?;
    let installed = match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init(),
    };
    Ok(installed.is_ok())
}
