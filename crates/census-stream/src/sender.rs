//! Outbound command transmission.

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buffer::ChunkBuffer;
use crate::config::StreamOptions;
use crate::error::{CloseCode, StreamError, StreamResult};
use crate::transport::{FrameWriter, OutboundFrame};

/// Serializes commands and writes them to the socket.
///
/// All writes go through one lock. Acquiring it is bounded by the
/// configured send lock timeout, so a stalled socket surfaces as
/// [`StreamError::SendTimeout`] instead of blocking callers forever.
#[derive(Debug)]
pub struct CommandSender<W> {
    state: Mutex<SendState<W>>,
    frame_size: usize,
    lock_timeout: Duration,
    shrink_threshold: usize,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct SendState<W> {
    buffer: ChunkBuffer,
    writer: Option<W>,
}

impl<W: FrameWriter> CommandSender<W> {
    /// Create a sender with no socket installed.
    pub fn new(options: &StreamOptions, cancel: CancellationToken) -> Self {
        Self {
            state: Mutex::new(SendState {
                buffer: ChunkBuffer::new(options.buffer_size),
                writer: None,
            }),
            frame_size: options.frame_size,
            lock_timeout: options.send_lock_timeout,
            shrink_threshold: options.buffer_shrink_threshold,
            cancel,
        }
    }

    /// Serialize `command` and send it as one message.
    ///
    /// The message is split into frames of at most the configured frame
    /// size; only the last frame is marked final.
    pub async fn send<C>(&self, command: &C) -> StreamResult<()>
    where
        C: Serialize + Sync + ?Sized,
    {
        let mut state = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(StreamError::Cancelled),
            guard = self.lock() => guard?,
        };

        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(StreamError::Cancelled),
            result = state.transmit(command, self.frame_size) => result,
        };

        state.buffer.clear();
        if state.buffer.reset_if_oversized(self.shrink_threshold) {
            debug!(threshold = self.shrink_threshold, "Reallocated oversized command buffer");
        }

        if let Err(e) = &result {
            if e.is_transport() {
                warn!(error = %e, "Failed to send command");
            }
        }
        result
    }

    /// Install the write half of a new connection, returning the previous one.
    ///
    /// Fails with [`StreamError::SendTimeout`] when a stalled send holds the
    /// lock past the send lock timeout; `writer` is dropped in that case.
    pub async fn install_writer(&self, writer: W) -> StreamResult<Option<W>> {
        Ok(self.lock().await?.writer.replace(writer))
    }

    /// Remove the current write half.
    pub async fn take_writer(&self) -> StreamResult<Option<W>> {
        Ok(self.lock().await?.writer.take())
    }

    /// Send a close frame on the current socket and drop the write half.
    ///
    /// Returns `Ok(false)` when no socket was installed.
    pub async fn close_writer(&self, code: CloseCode, reason: &str) -> StreamResult<bool> {
        let mut state = self.lock().await?;
        let Some(mut writer) = state.writer.take() else {
            return Ok(false);
        };
        writer.close(code, reason).await?;
        Ok(true)
    }

    /// Whether a socket is currently installed.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.writer.is_some()
    }

    async fn lock(&self) -> StreamResult<MutexGuard<'_, SendState<W>>> {
        tokio::time::timeout(self.lock_timeout, self.state.lock())
            .await
            .map_err(|_| StreamError::SendTimeout(self.lock_timeout))
    }
}

impl<W: FrameWriter> SendState<W> {
    async fn transmit<C>(&mut self, command: &C, frame_size: usize) -> StreamResult<()>
    where
        C: Serialize + Sync + ?Sized,
    {
        let Self { buffer, writer } = self;
        let writer = writer.as_mut().ok_or(StreamError::NotConnected)?;

        serde_json::to_writer(buffer.writer(), command)
            .map_err(|e| StreamError::EncodeFailed(e.to_string()))?;

        let mut frames = 0usize;
        for (chunk, fin) in buffer.chunks(frame_size) {
            writer
                .send_frame(OutboundFrame {
                    payload: Bytes::copy_from_slice(chunk),
                    first: frames == 0,
                    fin,
                })
                .await?;
            frames += 1;
        }

        debug!(bytes = buffer.len(), frames, "Command sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Default, Clone)]
    struct VecWriter {
        frames: Arc<SyncMutex<Vec<OutboundFrame>>>,
        closed: Arc<SyncMutex<Option<u16>>>,
        stall: bool,
    }

    impl FrameWriter for VecWriter {
        async fn send_frame(&mut self, frame: OutboundFrame) -> StreamResult<()> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            self.frames.lock().push(frame);
            Ok(())
        }

        async fn close(&mut self, code: CloseCode, _reason: &str) -> StreamResult<()> {
            *self.closed.lock() = Some(code.as_u16());
            Ok(())
        }
    }

    fn sender(options: &StreamOptions) -> CommandSender<VecWriter> {
        CommandSender::new(options, CancellationToken::new())
    }

    fn joined(frames: &[OutboundFrame]) -> serde_json::Value {
        let bytes: Vec<u8> = frames.iter().flat_map(|f| f.payload.to_vec()).collect();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_send_splits_into_frames() {
        let options = StreamOptions::new("example").frame_size(8);
        let sender = sender(&options);
        let writer = VecWriter::default();
        sender.install_writer(writer.clone()).await.unwrap();

        let command = json!({"action": "echo", "service": "event", "payload": {"n": 1}});
        sender.send(&command).await.unwrap();

        let frames = writer.frames.lock().clone();
        assert!(frames.len() > 1);
        assert!(frames.iter().all(|f| f.payload.len() <= 8));
        assert!(frames[0].first);
        assert!(frames[1..].iter().all(|f| !f.first));
        assert!(frames.last().unwrap().fin);
        assert!(frames[..frames.len() - 1].iter().all(|f| !f.fin));
        assert_eq!(joined(&frames), command);
    }

    #[tokio::test]
    async fn test_send_without_socket() {
        let sender = sender(&StreamOptions::new("example"));
        let err = sender.send(&json!({"action": "echo"})).await.unwrap_err();
        assert!(matches!(err, StreamError::NotConnected));
        assert!(sender.state.lock().await.buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_lock_timeout() {
        let options = StreamOptions::new("example").send_lock_timeout(Duration::from_millis(50));
        let sender = Arc::new(sender(&options));
        sender
            .install_writer(VecWriter {
                stall: true,
                ..VecWriter::default()
            })
            .await
            .unwrap();

        let stalled = {
            let sender = Arc::clone(&sender);
            tokio::spawn(async move { sender.send(&json!({"action": "echo"})).await })
        };
        tokio::task::yield_now().await;

        let err = sender.send(&json!({"action": "echo"})).await.unwrap_err();
        assert!(matches!(err, StreamError::SendTimeout(d) if d == Duration::from_millis(50)));
        stalled.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_cancelled() {
        let cancel = CancellationToken::new();
        let sender = Arc::new(CommandSender::new(&StreamOptions::new("example"), cancel.clone()));
        sender
            .install_writer(VecWriter {
                stall: true,
                ..VecWriter::default()
            })
            .await
            .unwrap();

        let pending = {
            let sender = Arc::clone(&sender);
            tokio::spawn(async move { sender.send(&json!({"action": "echo"})).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_cancellation());
        assert!(sender.state.lock().await.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_buffer_is_reset() {
        let options = StreamOptions::new("example")
            .buffer_size(16)
            .buffer_shrink_threshold(256);
        let sender = sender(&options);
        sender.install_writer(VecWriter::default()).await.unwrap();

        let big = json!({"action": "echo", "payload": "x".repeat(4096)});
        sender.send(&big).await.unwrap();
        assert!(sender.state.lock().await.buffer.capacity() <= 256);
    }

    #[tokio::test]
    async fn test_close_writer() {
        let sender = sender(&StreamOptions::new("example"));
        assert!(!sender.close_writer(CloseCode::Normal, "bye").await.unwrap());

        let writer = VecWriter::default();
        sender.install_writer(writer.clone()).await.unwrap();
        assert!(sender.is_connected().await);
        assert!(sender.close_writer(CloseCode::Normal, "bye").await.unwrap());
        assert_eq!(*writer.closed.lock(), Some(1000));
        assert!(!sender.is_connected().await);
    }

    #[tokio::test]
    async fn test_install_replaces_previous_writer() {
        let sender = sender(&StreamOptions::new("example"));
        assert!(sender.install_writer(VecWriter::default()).await.unwrap().is_none());
        assert!(sender.install_writer(VecWriter::default()).await.unwrap().is_some());
        assert!(sender.take_writer().await.unwrap().is_some());
        assert!(sender.take_writer().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_swap_bounded_by_lock_timeout() {
        let options = StreamOptions::new("example").send_lock_timeout(Duration::from_millis(50));
        let sender = Arc::new(sender(&options));
        sender
            .install_writer(VecWriter {
                stall: true,
                ..VecWriter::default()
            })
            .await
            .unwrap();

        let stalled = {
            let sender = Arc::clone(&sender);
            tokio::spawn(async move { sender.send(&json!({"action": "echo"})).await })
        };
        tokio::task::yield_now().await;

        assert!(matches!(
            sender.take_writer().await,
            Err(StreamError::SendTimeout(_))
        ));
        assert!(matches!(
            sender.install_writer(VecWriter::default()).await,
            Err(StreamError::SendTimeout(_))
        ));
        assert!(matches!(
            sender.close_writer(CloseCode::Normal, "bye").await,
            Err(StreamError::SendTimeout(_))
        ));

        stalled.abort();
        let _ = stalled.await;
        assert!(sender.take_writer().await.unwrap().is_some());
    }
}
