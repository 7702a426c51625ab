//! Structured logging for event-stream clients.
//!
//! `census-stream` only emits `tracing` events; this module installs the
//! subscriber that formats them. Production output is one JSON object per
//! line, development output is the multi-line pretty format.
//!
//! # Example
//!
//! ```rust,no_run
//! use census_telemetry::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::development())?;
//! tracing::info!(client_id = "example", state = "open", "connection state changed");
//! # Ok::<(), census_telemetry::TelemetryError>(())
//! ```

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Filter directive (e.g., "info", "`census_stream=debug,warn`").
    pub level: String,

    /// Let `RUST_LOG` override `level` when it is set.
    pub use_env_filter: bool,

    /// Whether to output JSON format.
    pub json_format: bool,

    /// Whether to include span events (new, close).
    pub span_events: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include thread IDs.
    pub thread_ids: bool,

    /// Whether to include target (module path).
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Human-readable output at `debug`, with span events and source locations.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            use_env_filter: true,
            json_format: false,
            span_events: true,
            file_line_info: true,
            thread_ids: false,
            include_target: true,
        }
    }

    /// JSON output at `info`.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            use_env_filter: true,
            json_format: true,
            span_events: false,
            file_line_info: false,
            thread_ids: false,
            include_target: true,
        }
    }

    /// Build the filter this configuration describes.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::InvalidFilter` if `level` does not parse.
    pub fn env_filter(&self) -> TelemetryResult<EnvFilter> {
        if self.use_env_filter {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return Ok(filter);
            }
        }
        create_env_filter(&self.level)
    }
}

/// Initializes the global logging subscriber.
///
/// A disabled configuration installs nothing.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidFilter` for a bad directive and
/// `TelemetryError::LoggingInit` if a global subscriber is already set.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = config.env_filter()?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_span_events(span_events)
        .with_file(config.file_line_info)
        .with_line_number(config.file_line_info)
        .with_thread_ids(config.thread_ids)
        .with_target(config.include_target);

    let layer = if config.json_format {
        layer.json().with_filter(filter).boxed()
    } else {
        layer.pretty().with_filter(filter).boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Creates an env filter from a directive string.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidFilter` if the directive is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter).map_err(|e| TelemetryError::InvalidFilter {
        filter: filter.to_string(),
        reason: e.to_string(),
    })
}

/// Field names used by `census-stream` log events.
pub mod fields {
    /// Client the event belongs to.
    pub const CLIENT_ID: &str = "client_id";

    /// Connection state.
    pub const STATE: &str = "state";

    /// Rust type name of the payload being dispatched.
    pub const PAYLOAD_TYPE: &str = "payload_type";

    /// Reconnection attempt number.
    pub const ATTEMPT: &str = "attempt";

    /// Error description.
    pub const ERROR: &str = "error";
}
