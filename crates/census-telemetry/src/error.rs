//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur while installing logging or metrics.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize metrics.
    #[error("Failed to initialize metrics: {0}")]
    MetricsInit(String),

    /// Failed to initialize logging.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// The log filter directive could not be parsed.
    #[error("Invalid log filter `{filter}`: {reason}")]
    InvalidFilter {
        /// The rejected directive.
        filter: String,
        /// Parser message.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::MetricsInit("recorder already installed".to_string());
        assert_eq!(
            err.to_string(),
            "Failed to initialize metrics: recorder already installed"
        );
    }

    #[test]
    fn test_invalid_filter_display() {
        let err = TelemetryError::InvalidFilter {
            filter: "census=loud".to_string(),
            reason: "invalid level".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid log filter `census=loud`: invalid level"
        );
    }
}
