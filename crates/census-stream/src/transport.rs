//! Socket abstraction used by the client.
//!
//! The client never talks to a WebSocket library directly. It opens
//! connections through a [`Connector`], reads through a [`FrameReader`] and
//! writes through a [`FrameWriter`]. The production implementation lives in
//! [`crate::ws`]; tests substitute scripted in-memory transports.

use std::future::Future;

use bytes::Bytes;
use url::Url;

use crate::error::{CloseCode, StreamError, StreamResult};

/// Close frame details reported by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code.
    pub code: u16,
    /// Close reason.
    pub reason: String,
}

impl CloseInfo {
    /// Create close details.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code: code.as_u16(),
            reason: reason.into(),
        }
    }
}

impl From<CloseInfo> for StreamError {
    fn from(info: CloseInfo) -> Self {
        StreamError::connection_closed(Some(info.code), info.reason)
    }
}

/// A frame received from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A data fragment. `fin` marks the last fragment of a message.
    Data {
        /// Fragment bytes.
        payload: Bytes,
        /// End of message.
        fin: bool,
    },
    /// The peer closed the connection.
    Close(Option<CloseInfo>),
}

impl InboundFrame {
    /// A complete single-fragment text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Data {
            payload: Bytes::from(text.into()),
            fin: true,
        }
    }

    /// A fragment of a larger message.
    pub fn fragment(payload: impl Into<Bytes>, fin: bool) -> Self {
        Self::Data {
            payload: payload.into(),
            fin,
        }
    }
}

/// A frame to be written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Frame bytes.
    pub payload: Bytes,
    /// First frame of the message (a text frame rather than a continuation).
    pub first: bool,
    /// Last frame of the message.
    pub fin: bool,
}

/// Opens socket connections.
pub trait Connector: Send + Sync + 'static {
    /// Read half of an open connection.
    type Reader: FrameReader;
    /// Write half of an open connection.
    type Writer: FrameWriter;

    /// Perform the handshake against `url`.
    fn connect(
        &self,
        url: &Url,
    ) -> impl Future<Output = StreamResult<(Self::Reader, Self::Writer)>> + Send;
}

/// Read half of a connection.
pub trait FrameReader: Send + 'static {
    /// Next frame, or `None` when the stream has ended.
    fn next_frame(&mut self) -> impl Future<Output = Option<StreamResult<InboundFrame>>> + Send;
}

/// Write half of a connection.
pub trait FrameWriter: Send + 'static {
    /// Write one frame.
    fn send_frame(&mut self, frame: OutboundFrame) -> impl Future<Output = StreamResult<()>> + Send;

    /// Send a close frame and shut the write half down.
    fn close(
        &mut self,
        code: CloseCode,
        reason: &str,
    ) -> impl Future<Output = StreamResult<()>> + Send;
}
