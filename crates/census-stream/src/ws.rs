//! `tokio-tungstenite` transport.

use std::sync::Once;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument, trace};
use tungstenite::protocol::frame::coding::{Data, OpCode};
use tungstenite::protocol::frame::{CloseFrame, Frame};
use tungstenite::Message;
use url::Url;

use crate::error::{CloseCode, StreamError, StreamResult};
use crate::transport::{CloseInfo, Connector, FrameReader, FrameWriter, InboundFrame, OutboundFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Install the ring crypto provider for `wss://` handshakes.
///
/// A provider installed earlier by the application is left in place.
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if rustls::crypto::ring::default_provider().install_default().is_err() {
            debug!("Using the process-level crypto provider already installed");
        }
    });
}

fn receive_error(e: tungstenite::Error) -> StreamError {
    match e {
        tungstenite::Error::Io(e) => StreamError::Io(e),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            StreamError::connection_closed(None, "socket closed without a close frame")
        }
        other => StreamError::receive_failed(other.to_string()),
    }
}

fn send_error(e: tungstenite::Error) -> StreamError {
    match e {
        tungstenite::Error::Io(e) => StreamError::Io(e),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            StreamError::connection_closed(None, "socket already closed")
        }
        other => StreamError::send_failed(other.to_string()),
    }
}

/// Connector opening `ws://` and `wss://` connections with `tokio-tungstenite`.
///
/// TLS uses rustls with the platform's native root certificates.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

impl Connector for TungsteniteConnector {
    type Reader = TungsteniteReader;
    type Writer = TungsteniteWriter;

    #[instrument(skip_all, fields(host = url.host_str().unwrap_or_default()))]
    async fn connect(&self, url: &Url) -> StreamResult<(Self::Reader, Self::Writer)> {
        install_crypto_provider();
        let (stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| StreamError::handshake_failed(e.to_string()))?;
        debug!(status = %response.status(), "WebSocket handshake complete");

        let (sink, stream) = stream.split();
        Ok((TungsteniteReader { stream }, TungsteniteWriter { sink }))
    }
}

/// Read half of a `tokio-tungstenite` connection.
#[derive(Debug)]
pub struct TungsteniteReader {
    stream: SplitStream<WsStream>,
}

impl FrameReader for TungsteniteReader {
    async fn next_frame(&mut self) -> Option<StreamResult<InboundFrame>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(receive_error(e))),
            };

            let frame = match message {
                Message::Text(text) => InboundFrame::Data {
                    payload: Bytes::from(text),
                    fin: true,
                },
                Message::Binary(data) => InboundFrame::Data {
                    payload: data,
                    fin: true,
                },
                Message::Close(frame) => InboundFrame::Close(frame.map(|f| CloseInfo {
                    code: u16::from(f.code),
                    reason: f.reason.as_str().to_owned(),
                })),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    trace!("Skipping control frame");
                    continue;
                }
            };
            return Some(Ok(frame));
        }
    }
}

/// Write half of a `tokio-tungstenite` connection.
#[derive(Debug)]
pub struct TungsteniteWriter {
    sink: SplitSink<WsStream, Message>,
}

impl FrameWriter for TungsteniteWriter {
    async fn send_frame(&mut self, frame: OutboundFrame) -> StreamResult<()> {
        let opcode = if frame.first {
            OpCode::Data(Data::Text)
        } else {
            OpCode::Data(Data::Continue)
        };
        self.sink
            .send(Message::Frame(Frame::message(frame.payload, opcode, frame.fin)))
            .await
            .map_err(send_error)
    }

    async fn close(&mut self, code: CloseCode, reason: &str) -> StreamResult<()> {
        let frame = CloseFrame {
            code: code.as_u16().into(),
            reason: reason.to_owned().into(),
        };
        match self.sink.send(Message::Close(Some(frame))).await {
            Ok(()) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        match self.sink.close().await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    async fn local_server() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = Url::parse(&format!(
            "ws://127.0.0.1:{port}/streaming?environment=ps2&service-id=s:example"
        ))
        .unwrap();
        (listener, url)
    }

    #[tokio::test]
    async fn test_receive_text_as_final_frame() {
        let (listener, url) = local_server().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::text(r#"{"service":"push"}"#)).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let (mut reader, _writer) = TungsteniteConnector::new().connect(&url).await.unwrap();
        let frame = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(frame, InboundFrame::text(r#"{"service":"push"}"#));

        let next = reader.next_frame().await;
        assert!(matches!(next, Some(Ok(InboundFrame::Close(_))) | None));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_chunked_send_arrives_as_one_message() {
        let (listener, url) = local_server().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected {other:?}"),
                }
            }
        });

        let (_reader, mut writer) = TungsteniteConnector::new().connect(&url).await.unwrap();
        let chunks = [(&br#"{"action":"#[..], true, false), (&br#""echo"}"#[..], false, true)];
        for (chunk, first, fin) in chunks {
            writer
                .send_frame(OutboundFrame {
                    payload: Bytes::copy_from_slice(chunk),
                    first,
                    fin,
                })
                .await
                .unwrap();
        }

        assert_eq!(server.await.unwrap(), r#"{"action":"echo"}"#);
    }

    #[tokio::test]
    async fn test_handshake_failure() {
        let (listener, url) = local_server().await;
        drop(listener);

        let err = TungsteniteConnector::new().connect(&url).await.unwrap_err();
        assert!(matches!(err, StreamError::HandshakeFailed(_)));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_tls_handshake_failure_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            drop(tcp);
        });

        let url = Url::parse(&format!(
            "wss://127.0.0.1:{port}/streaming?environment=ps2&service-id=s:example"
        ))
        .unwrap();
        let connect = tokio::spawn(async move { TungsteniteConnector::new().connect(&url).await });
        let result = connect.await.expect("connect must not panic");
        assert!(matches!(result, Err(StreamError::HandshakeFailed(_))));
        server.await.unwrap();
    }

    #[test]
    fn test_provider_install_is_idempotent() {
        install_crypto_provider();
        install_crypto_provider();
        assert!(rustls::crypto::CryptoProvider::get_default().is_some());
    }

    #[test]
    fn test_socket_errors_keep_their_kind() {
        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        let err = receive_error(tungstenite::Error::Io(reset));
        assert!(matches!(&err, StreamError::Io(e) if e.kind() == std::io::ErrorKind::ConnectionReset));
        assert!(err.is_transport());

        let err = send_error(tungstenite::Error::AlreadyClosed);
        assert!(matches!(err, StreamError::ConnectionClosed { code: None, .. }));

        let err = receive_error(tungstenite::Error::Protocol(
            tungstenite::error::ProtocolError::ResetWithoutClosingHandshake,
        ));
        assert!(matches!(err, StreamError::ReceiveFailed(_)));
    }
}
