//! Configuration types.
//!
//! [`CensusConfig`] is the file/environment shape of a client's settings.
//! Durations are stored as integer milliseconds so they read naturally in
//! TOML and environment variables; [`StreamSection::to_options`] turns them
//! back into a [`StreamOptions`].

use std::time::Duration;

use census_stream::{RotatingServiceIds, StreamOptions};
use census_telemetry::LogConfig;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Complete client configuration.
///
/// # Example
///
/// ```
/// use census_config::CensusConfig;
///
/// let config = CensusConfig::default();
/// assert_eq!(config.stream.environment, "ps2");
/// assert_eq!(config.stream.reconnection_delay_ms, 5_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CensusConfig {
    /// Connection and dispatch settings.
    #[serde(default)]
    pub stream: StreamSection,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingSection,
}

impl CensusConfig {
    /// Development preset: pretty logs at `debug`.
    #[must_use]
    pub fn development() -> Self {
        Self {
            stream: StreamSection::default(),
            logging: LoggingSection {
                level: "debug".to_string(),
                format: LogFormat::Pretty,
                span_events: true,
                file_line_info: true,
                ..LoggingSection::default()
            },
        }
    }

    /// Production preset: JSON logs at `info`.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingField` when no service id is set and
    /// `ConfigError::InvalidValue` for any rejected value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.service_id.trim().is_empty() {
            return Err(ConfigError::missing_field("stream.service_id"));
        }

        self.stream
            .to_options()
            .validate()
            .map_err(ConfigError::from_stream)?;

        if self
            .stream
            .fallback_service_ids
            .iter()
            .any(|id| id.trim().is_empty())
        {
            return Err(ConfigError::invalid_value(
                "stream.fallback_service_ids",
                "service ids must not be empty",
            ));
        }

        census_telemetry::logging::create_env_filter(&self.logging.level)
            .map_err(|e| ConfigError::invalid_value("logging.level", e.to_string()))?;

        Ok(())
    }
}

/// Connection and dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StreamSection {
    /// Root endpoint of the push service.
    pub root_endpoint: String,

    /// Service id issued by the service operator. Required.
    pub service_id: String,

    /// Further service ids to rotate through when connecting keeps failing.
    pub fallback_service_ids: Vec<String>,

    /// Consecutive failures before moving to the next service id.
    pub rotate_after_failures: u32,

    /// Game environment.
    pub environment: String,

    /// Delay before every reconnection attempt.
    pub reconnection_delay_ms: u64,

    /// Maximum outbound frame size in bytes.
    pub frame_size: usize,

    /// Upper bound on waiting for the command write lock.
    pub send_lock_timeout_ms: u64,

    /// Initial capacity of the outbound serialization buffer.
    pub buffer_size: usize,

    /// Buffer capacity above which it is reallocated after a send.
    pub buffer_shrink_threshold: usize,

    /// Recent service messages remembered per type for duplicate suppression.
    pub duplicate_window: usize,

    /// Dispatches in flight before the receive loop waits.
    pub max_outstanding_dispatches: usize,

    /// How long shutdown waits for in-flight dispatches.
    pub shutdown_grace_ms: u64,

    /// Replay subscriptions after a reconnect.
    pub resubscribe_on_reconnect: bool,
}

impl Default for StreamSection {
    fn default() -> Self {
        let options = StreamOptions::default();
        Self {
            root_endpoint: options.root_endpoint,
            service_id: options.service_id,
            fallback_service_ids: Vec::new(),
            rotate_after_failures: 3,
            environment: options.environment,
            reconnection_delay_ms: millis(options.reconnection_delay),
            frame_size: options.frame_size,
            send_lock_timeout_ms: millis(options.send_lock_timeout),
            buffer_size: options.buffer_size,
            buffer_shrink_threshold: options.buffer_shrink_threshold,
            duplicate_window: options.duplicate_window,
            max_outstanding_dispatches: options.max_outstanding_dispatches,
            shutdown_grace_ms: millis(options.shutdown_grace),
            resubscribe_on_reconnect: options.resubscribe_on_reconnect,
        }
    }
}

impl StreamSection {
    /// Build the client options this section describes.
    #[must_use]
    pub fn to_options(&self) -> StreamOptions {
        StreamOptions::new(self.service_id.clone())
            .root_endpoint(self.root_endpoint.clone())
            .environment(self.environment.clone())
            .reconnection_delay(Duration::from_millis(self.reconnection_delay_ms))
            .frame_size(self.frame_size)
            .send_lock_timeout(Duration::from_millis(self.send_lock_timeout_ms))
            .buffer_size(self.buffer_size)
            .buffer_shrink_threshold(self.buffer_shrink_threshold)
            .duplicate_window(self.duplicate_window)
            .max_outstanding_dispatches(self.max_outstanding_dispatches)
            .shutdown_grace(Duration::from_millis(self.shutdown_grace_ms))
            .resubscribe_on_reconnect(self.resubscribe_on_reconnect)
    }

    /// Rotation over the primary and fallback service ids.
    ///
    /// `None` when there are no fallbacks; the client then uses
    /// `service_id` on every attempt.
    #[must_use]
    pub fn service_id_rotation(&self) -> Option<RotatingServiceIds> {
        if self.fallback_service_ids.is_empty() {
            return None;
        }
        let ids = std::iter::once(&self.service_id)
            .chain(&self.fallback_service_ids)
            .cloned();
        RotatingServiceIds::new(ids, self.rotate_after_failures)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    /// Whether to install a subscriber at all.
    pub enabled: bool,

    /// Filter directive, e.g. `info` or `census_stream=debug,warn`.
    pub level: String,

    /// Output format.
    pub format: LogFormat,

    /// Let `RUST_LOG` override `level`.
    pub use_env_filter: bool,

    /// Emit span open/close events.
    pub span_events: bool,

    /// Include source file and line.
    pub file_line_info: bool,

    /// Include thread ids.
    pub thread_ids: bool,

    /// Include the module path.
    pub include_target: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        let config = LogConfig::production();
        Self {
            enabled: config.enabled,
            level: config.level,
            format: LogFormat::Json,
            use_env_filter: config.use_env_filter,
            span_events: config.span_events,
            file_line_info: config.file_line_info,
            thread_ids: config.thread_ids,
            include_target: config.include_target,
        }
    }
}

impl LoggingSection {
    /// Build the telemetry logging configuration.
    #[must_use]
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            enabled: self.enabled,
            level: self.level.clone(),
            use_env_filter: self.use_env_filter,
            json_format: self.format == LogFormat::Json,
            span_events: self.span_events,
            file_line_info: self.file_line_info,
            thread_ids: self.thread_ids,
            include_target: self.include_target,
        }
    }
}
