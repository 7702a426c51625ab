//! Typed, layered configuration for Census event-stream clients.
//!
//! Settings are loaded in layers (defaults, then a TOML or JSON file, then
//! environment variables) into a [`CensusConfig`], validated, and converted
//! into the types the other crates consume:
//!
//! - [`StreamSection::to_options`] → `census_stream::StreamOptions`
//! - [`LoggingSection::to_log_config`] → `census_telemetry::LogConfig`
//!
//! Unknown fields are rejected so a typo never silently falls back to a
//! default.
//!
//! # Example
//!
//! ```no_run
//! use census_config::ConfigLoader;
//!
//! # fn main() -> Result<(), census_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_file("census.toml")?
//!     .with_env_prefix("CENSUS")
//!     .load()?;
//!
//! let options = config.stream.to_options();
//! let logging = config.logging.to_log_config();
//! # let _ = (options, logging);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [stream]
//! service_id = "example"
//! fallback_service_ids = ["backup"]
//! rotate_after_failures = 3
//! environment = "ps2"
//! reconnection_delay_ms = 5000
//! frame_size = 4096
//! duplicate_window = 100
//! shutdown_grace_ms = 10000
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Every key can be overridden with `PREFIX__SECTION__KEY`:
//!
//! - `CENSUS__STREAM__SERVICE_ID=example`
//! - `CENSUS__STREAM__FALLBACK_SERVICE_IDS=backup,spare`
//! - `CENSUS__LOGGING__LEVEL=census_stream=debug`

#![warn(missing_docs)]

mod config;
mod error;
mod loader;

pub use config::{CensusConfig, LogFormat, LoggingSection, StreamSection};
pub use error::ConfigError;
pub use loader::ConfigLoader;
