//! Configuration error types.

use std::path::PathBuf;

use census_stream::StreamError;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// Failed to read configuration file.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML configuration: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON parsing error.
    #[error("failed to parse JSON configuration: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Neither TOML nor JSON.
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// Invalid configuration value.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field with the invalid value, as `section.key`.
        field: String,
        /// Explanation of why the value is invalid.
        reason: String,
    },

    /// Missing required field.
    #[error("missing required configuration field: {field}")]
    MissingField {
        /// The missing field name.
        field: String,
    },

    /// Environment variable parsing error.
    #[error("failed to parse environment variable {var}: {reason}")]
    EnvParseError {
        /// The environment variable name.
        var: String,
        /// Explanation of the parsing error.
        reason: String,
    },
}

impl ConfigError {
    /// Create a new file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Create a new read error.
    pub fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadError {
            path: path.into(),
            source,
        }
    }

    /// Create a new invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a new missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create a new environment variable parse error.
    pub fn env_parse_error(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvParseError {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// Map a rejected [`StreamOptions`](census_stream::StreamOptions) onto
    /// the `stream` section.
    pub fn from_stream(err: StreamError) -> Self {
        match err {
            StreamError::InvalidOptions { field, reason } => {
                Self::invalid_value(format!("stream.{field}"), reason)
            }
            other => Self::invalid_value("stream", other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_not_found_error() {
        let err = ConfigError::file_not_found("/etc/census/stream.toml");
        assert_eq!(
            err.to_string(),
            "configuration file not found: /etc/census/stream.toml"
        );
    }

    #[test]
    fn test_missing_field_error() {
        let err = ConfigError::missing_field("stream.service_id");
        assert_eq!(
            err.to_string(),
            "missing required configuration field: stream.service_id"
        );
    }

    #[test]
    fn test_env_parse_error() {
        let err = ConfigError::env_parse_error("CENSUS__STREAM__FRAME_SIZE", "expected integer");
        assert!(err.to_string().contains("CENSUS__STREAM__FRAME_SIZE"));
        assert!(err.to_string().contains("expected integer"));
    }

    #[test]
    fn test_from_stream_prefixes_section() {
        let err = ConfigError::from_stream(StreamError::invalid_options(
            "frame_size",
            "must be greater than zero",
        ));
        match err {
            ConfigError::InvalidValue { field, reason } => {
                assert_eq!(field, "stream.frame_size");
                assert_eq!(reason, "must be greater than zero");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
