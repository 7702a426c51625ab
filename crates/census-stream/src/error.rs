//! Error types for event-stream operations.
//!
//! This module defines the errors that can occur while configuring the
//! client, establishing or maintaining the WebSocket connection, sending
//! commands, and decoding inbound payloads.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type for event-stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur during event-stream operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The client options are invalid. Raised at construction time.
    #[error("invalid stream option {field}: {reason}")]
    InvalidOptions {
        /// The offending option.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The WebSocket handshake failed.
    #[error("WebSocket handshake failed: {0}")]
    HandshakeFailed(String),

    /// The WebSocket connection was closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Optional close code from the peer.
        code: Option<u16>,
        /// Reason for closing.
        reason: String,
    },

    /// No socket is currently open.
    #[error("not connected")]
    NotConnected,

    /// Failed to receive a frame.
    #[error("failed to receive frame: {0}")]
    ReceiveFailed(String),

    /// Failed to send a frame.
    #[error("failed to send frame: {0}")]
    SendFailed(String),

    /// The command write lock could not be acquired in time.
    #[error("timed out after {0:?} waiting for the command write lock")]
    SendTimeout(Duration),

    /// The operation was cancelled by the client's cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// An outbound command could not be serialized.
    #[error("failed to encode command: {0}")]
    EncodeFailed(String),

    /// An inbound payload could not be decoded into its registered type.
    #[error("failed to decode {type_name}: {reason}")]
    DecodeFailed {
        /// The payload type that was being decoded.
        type_name: &'static str,
        /// The decoder's error message.
        reason: String,
    },

    /// `start` was called on a client that is already running.
    #[error("client already started")]
    AlreadyStarted,

    /// The operation requires a started client.
    #[error("client not started")]
    NotStarted,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tungstenite error.
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tungstenite::Error),
}

impl StreamError {
    /// Create a new invalid options error.
    pub fn invalid_options(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOptions {
            field,
            reason: reason.into(),
        }
    }

    /// Create a new handshake failed error.
    pub fn handshake_failed(reason: impl Into<String>) -> Self {
        Self::HandshakeFailed(reason.into())
    }

    /// Create a new connection closed error.
    pub fn connection_closed(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            code,
            reason: reason.into(),
        }
    }

    /// Create a new receive failed error.
    pub fn receive_failed(reason: impl Into<String>) -> Self {
        Self::ReceiveFailed(reason.into())
    }

    /// Create a new send failed error.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::SendFailed(reason.into())
    }

    /// Create a new decode failed error.
    pub fn decode_failed(type_name: &'static str, reason: impl fmt::Display) -> Self {
        Self::DecodeFailed {
            type_name,
            reason: reason.to_string(),
        }
    }

    /// Get the close code if this is a connection closed error.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::ConnectionClosed { code, .. } => *code,
            _ => None,
        }
    }

    /// Check if this error is recovered by reconnecting.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::HandshakeFailed(_)
                | Self::ConnectionClosed { .. }
                | Self::NotConnected
                | Self::ReceiveFailed(_)
                | Self::SendFailed(_)
                | Self::Io(_)
                | Self::Tungstenite(_)
        )
    }

    /// Check if this error is an expected consequence of cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Close code for WebSocket connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure (1000).
    Normal = 1000,
    /// Going away (1001).
    GoingAway = 1001,
    /// Protocol error (1002).
    Protocol = 1002,
    /// Unsupported data (1003).
    Unsupported = 1003,
    /// No status received (1005).
    NoStatus = 1005,
    /// Abnormal closure (1006).
    Abnormal = 1006,
    /// Invalid payload data (1007).
    InvalidPayload = 1007,
    /// Policy violation (1008).
    PolicyViolation = 1008,
    /// Message too big (1009).
    MessageTooBig = 1009,
    /// Internal error (1011).
    InternalError = 1011,
    /// Service restart (1012).
    ServiceRestart = 1012,
    /// Try again later (1013).
    TryAgainLater = 1013,
}

impl CloseCode {
    /// Convert from a u16 code.
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            1002 => Some(Self::Protocol),
            1003 => Some(Self::Unsupported),
            1005 => Some(Self::NoStatus),
            1006 => Some(Self::Abnormal),
            1007 => Some(Self::InvalidPayload),
            1008 => Some(Self::PolicyViolation),
            1009 => Some(Self::MessageTooBig),
            1011 => Some(Self::InternalError),
            1012 => Some(Self::ServiceRestart),
            1013 => Some(Self::TryAgainLater),
            _ => None,
        }
    }

    /// Get the u16 value of this close code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether a peer closing with this code counts as a normal shutdown.
    pub fn is_graceful(self) -> bool {
        matches!(self, Self::Normal | Self::GoingAway)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "Normal",
            Self::GoingAway => "GoingAway",
            Self::Protocol => "Protocol",
            Self::Unsupported => "Unsupported",
            Self::NoStatus => "NoStatus",
            Self::Abnormal => "Abnormal",
            Self::InvalidPayload => "InvalidPayload",
            Self::PolicyViolation => "PolicyViolation",
            Self::MessageTooBig => "MessageTooBig",
            Self::InternalError => "InternalError",
            Self::ServiceRestart => "ServiceRestart",
            Self::TryAgainLater => "TryAgainLater",
        };
        write!(f, "{} ({})", name, self.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_options_message() {
        let err = StreamError::invalid_options("service_id", "must not be empty");
        assert!(matches!(err, StreamError::InvalidOptions { .. }));
        assert_eq!(
            err.to_string(),
            "invalid stream option service_id: must not be empty"
        );
        assert!(!err.is_transport());
    }

    #[test]
    fn test_connection_closed_is_transport() {
        let err = StreamError::connection_closed(Some(1006), "reset by peer");
        assert_eq!(err.close_code(), Some(1006));
        assert!(err.is_transport());
    }

    #[test]
    fn test_send_timeout_not_transport() {
        let err = StreamError::SendTimeout(Duration::from_millis(250));
        assert!(!err.is_transport());
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_cancellation() {
        assert!(StreamError::Cancelled.is_cancellation());
        assert!(!StreamError::NotConnected.is_cancellation());
    }

    #[test]
    fn test_decode_failed_names_type() {
        let err = StreamError::decode_failed("Heartbeat", "missing field `online`");
        assert!(err.to_string().contains("Heartbeat"));
        assert!(err.to_string().contains("online"));
    }

    #[test]
    fn test_close_code_round_trip() {
        assert_eq!(CloseCode::from_u16(1000), Some(CloseCode::Normal));
        assert_eq!(CloseCode::from_u16(1012), Some(CloseCode::ServiceRestart));
        assert_eq!(CloseCode::from_u16(4000), None);
        assert_eq!(CloseCode::Abnormal.as_u16(), 1006);
    }

    #[test]
    fn test_close_code_graceful() {
        assert!(CloseCode::Normal.is_graceful());
        assert!(CloseCode::GoingAway.is_graceful());
        assert!(!CloseCode::Abnormal.is_graceful());
    }

    #[test]
    fn test_close_code_display() {
        assert_eq!(CloseCode::Normal.to_string(), "Normal (1000)");
        assert_eq!(CloseCode::TryAgainLater.to_string(), "TryAgainLater (1013)");
    }
}
