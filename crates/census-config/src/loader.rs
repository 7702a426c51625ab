//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, and environment variables.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::{CensusConfig, ConfigError, LogFormat};

/// Configuration loader with layered approach.
///
/// Later layers override earlier ones:
/// 1. Default values (built into the code)
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables, optionally seeded from a `.env` file
///
/// # Example
///
/// ```no_run
/// use census_config::ConfigLoader;
///
/// # fn main() -> Result<(), census_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_optional_file("census.toml")?
///     .with_dotenv()?
///     .with_env_prefix("CENSUS")
///     .load()?;
///
/// let options = config.stream.to_options();
/// # let _ = options;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: CensusConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CensusConfig::default(),
            env_prefix: None,
        }
    }

    /// Start with default configuration values.
    ///
    /// This is what `new()` starts from; chain it for clarity or to reset.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = CensusConfig::default();
        self
    }

    /// Start with the development preset.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = CensusConfig::development();
        self
    }

    /// Start with the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = CensusConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// The format follows the extension: `.toml` or `.json`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The file does not exist
    /// - The file cannot be read
    /// - The file contains invalid TOML/JSON
    /// - The file contains unknown fields
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        self.config = Self::parse_file(&content, path)?;
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read or parsed.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string.
    ///
    /// `format` is `"toml"` or `"json"`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or the format is unknown.
    ///
    /// # Example
    ///
    /// ```
    /// use census_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [stream]
    ///     service_id = "example"
    ///     reconnection_delay_ms = 2000
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.stream.service_id, "example");
    /// assert_eq!(config.stream.frame_size, 4096);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => return Err(ConfigError::UnsupportedFormat(format.to_string())),
        };
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Variables use the format `PREFIX__SECTION__KEY`, e.g. with prefix
    /// `CENSUS`:
    /// - `CENSUS__STREAM__SERVICE_ID=example`
    /// - `CENSUS__STREAM__RECONNECTION_DELAY_MS=2000`
    /// - `CENSUS__LOGGING__FORMAT=pretty`
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment, if one exists.
    ///
    /// Variables already set in the environment win over the file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EnvParseError` if a `.env` file exists but is
    /// malformed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(ConfigError::env_parse_error(".env", e.to_string())),
        }
    }

    /// Apply environment overrides, validate, and return the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Environment variable parsing fails
    /// - Configuration validation fails
    pub fn load(mut self) -> Result<CensusConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Return the configuration as loaded so far, without environment
    /// overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> CensusConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<CensusConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let env_vars: HashMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect();

        for (key, value) in env_vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(rest) = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
        else {
            // e.g. CENSUS_HOME for prefix CENSUS
            return Ok(());
        };

        let parts: Vec<&str> = rest.split("__").collect();
        let stream = &mut self.config.stream;
        let logging = &mut self.config.logging;

        match parts.as_slice() {
            ["STREAM", "ROOT_ENDPOINT"] => stream.root_endpoint = value.to_string(),
            ["STREAM", "SERVICE_ID"] => stream.service_id = value.to_string(),
            ["STREAM", "FALLBACK_SERVICE_IDS"] => {
                stream.fallback_service_ids = value
                    .split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(String::from)
                    .collect();
            }
            ["STREAM", "ROTATE_AFTER_FAILURES"] => {
                stream.rotate_after_failures = parse_number(key, value)?;
            }
            ["STREAM", "ENVIRONMENT"] => stream.environment = value.to_string(),
            ["STREAM", "RECONNECTION_DELAY_MS"] => {
                stream.reconnection_delay_ms = parse_number(key, value)?;
            }
            ["STREAM", "FRAME_SIZE"] => stream.frame_size = parse_number(key, value)?,
            ["STREAM", "SEND_LOCK_TIMEOUT_MS"] => {
                stream.send_lock_timeout_ms = parse_number(key, value)?;
            }
            ["STREAM", "BUFFER_SIZE"] => stream.buffer_size = parse_number(key, value)?,
            ["STREAM", "BUFFER_SHRINK_THRESHOLD"] => {
                stream.buffer_shrink_threshold = parse_number(key, value)?;
            }
            ["STREAM", "DUPLICATE_WINDOW"] => stream.duplicate_window = parse_number(key, value)?,
            ["STREAM", "MAX_OUTSTANDING_DISPATCHES"] => {
                stream.max_outstanding_dispatches = parse_number(key, value)?;
            }
            ["STREAM", "SHUTDOWN_GRACE_MS"] => {
                stream.shutdown_grace_ms = parse_number(key, value)?;
            }
            ["STREAM", "RESUBSCRIBE_ON_RECONNECT"] => {
                stream.resubscribe_on_reconnect = parse_flag(key, value)?;
            }

            ["LOGGING", "ENABLED"] => logging.enabled = parse_flag(key, value)?,
            ["LOGGING", "LEVEL"] => logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => {
                logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["LOGGING", "USE_ENV_FILTER"] => logging.use_env_filter = parse_flag(key, value)?,
            ["LOGGING", "SPAN_EVENTS"] => logging.span_events = parse_flag(key, value)?,
            ["LOGGING", "FILE_LINE_INFO"] => logging.file_line_info = parse_flag(key, value)?,
            ["LOGGING", "THREAD_IDS"] => logging.thread_ids = parse_flag(key, value)?,
            ["LOGGING", "INCLUDE_TARGET"] => logging.include_target = parse_flag(key, value)?,

            _ => {}
        }

        Ok(())
    }
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}
