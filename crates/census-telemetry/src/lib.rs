//! Logging and metrics setup for Census event-stream clients.
//!
//! `census-stream` never installs a subscriber or a recorder. Applications
//! call [`init_telemetry`] (or the individual `init_*` functions) once at
//! startup:
//!
//! - **Logging**: `tracing-subscriber` with an `EnvFilter`, JSON or pretty
//! - **Metrics**: a Prometheus recorder for the `census_stream_*` metrics
//!
//! ```text
//!   census-stream ──tracing──▶ fmt layer ──▶ stdout
//!        │
//!        └────────metrics────▶ Prometheus recorder ──▶ render_metrics()
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use census_telemetry::{init_telemetry, LogConfig, TelemetryConfig};
//!
//! let config = TelemetryConfig::builder()
//!     .logging(LogConfig::production())
//!     .log_level("census_stream=debug,info")
//!     .build();
//! init_telemetry(&config)?;
//!
//! // later, from a /metrics endpoint
//! let body = census_telemetry::render_metrics().unwrap_or_default();
//! # let _ = body;
//! # Ok::<(), census_telemetry::TelemetryError>(())
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_telemetry_installs_nothing() {
        let config = TelemetryConfig {
            logging: LogConfig {
                enabled: false,
                ..LogConfig::default()
            },
            metrics: MetricsConfig {
                enabled: false,
                ..MetricsConfig::default()
            },
        };
        assert!(init_telemetry(&config).is_ok());
        assert!(render_metrics().is_none());
    }
}
