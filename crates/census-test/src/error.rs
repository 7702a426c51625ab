//! Test error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the test helpers.
#[derive(Debug, Error)]
pub enum TestError {
    /// A condition was not met in time.
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),

    /// A recorded message is not valid UTF-8.
    #[error("recorded message is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// A recorded message is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A recorded session or message does not exist.
    #[error("no {0} at index {1}")]
    Missing(&'static str, usize),
}

impl TestError {
    /// Create a timeout error.
    pub fn timeout(after: Duration, what: impl Into<String>) -> Self {
        Self::Timeout(after, what.into())
    }
}
