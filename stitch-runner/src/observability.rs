//! Tracing subscriber setup with format selection.

use anyhow::{Context, Result};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Machine-readable JSON lines.
    Json,
    /// Human-readable multi-line output.
    Pretty,
    /// Single-line output.
    #[default]
    Compact,
}

/// Configuration for tracing initialization.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// EnvFilter directive string (e.g. `info,stitch_runner=debug`).
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
    /// Include file/line location in events.
    pub include_location: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::default(),
            include_location: false,
        }
    }
}

impl TracingConfig {
    /// Load from `STITCH_LOG` and `STITCH_LOG_FORMAT`, falling back to
    /// defaults.
    #[must_use]
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        if let Ok(filter) = std::env::var("STITCH_LOG") {
            config.filter = filter;
        }
        if let Ok(format) = std::env::var("STITCH_LOG_FORMAT") {
            config.format = match format.as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => LogFormat::Compact,
            };
        }
        config
    }
}

/// Guard that keeps the tracing infrastructure alive.
///
/// Hold it for the duration of the program.
pub struct TracingGuard {
    _private: (),
}

/// Initialize tracing with the given configuration.
///
/// Returns a guard that must be kept alive for the duration of the
/// program.
///
/// # Example
///
/// ```ignore
/// let _guard = init_tracing(TracingConfig::default())?;
/// // ... application code ...
/// ```
pub fn init_tracing(config: TracingConfig) -> Result<TracingGuard> {
    let filter =
        EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_span_events(FmtSpan::CLOSE)
                        .flatten_event(true),
                )
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .pretty()
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .compact()
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
    }

    Ok(TracingGuard { _private: () })
}
