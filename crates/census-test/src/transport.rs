//! Scripted in-memory transport.
//!
//! Each connection attempt made through a [`ScriptedConnector`] consumes the
//! next [`ScriptedSession`]. A session either refuses the handshake or
//! delivers its frames, then ends the way the script says. Everything the
//! client writes is kept in a per-session [`Transcript`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use census_stream::{
    CloseCode, CloseInfo, Connector, FrameReader, FrameWriter, InboundFrame, OutboundFrame,
    StreamError, StreamResult,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use url::Url;

use crate::error::TestError;

/// How a scripted session ends once its frames are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Stay open with nothing more to read.
    Hold,
    /// The service sends a close frame.
    Close(Option<CloseInfo>),
    /// The connection fails with a receive error.
    Fail(String),
    /// The stream ends without a close frame.
    EndOfStream,
}

#[derive(Debug)]
enum Source {
    Script {
        frames: VecDeque<InboundFrame>,
        end: SessionEnd,
    },
    Live(mpsc::UnboundedReceiver<InboundFrame>),
    Refuse(String),
}

/// One scripted connection.
///
/// ```
/// use census_test::ScriptedSession;
///
/// let session = ScriptedSession::new()
///     .text(r#"{"connected":"true","service":"push","type":"connectionStateChanged"}"#)
///     .then_fail("connection reset");
/// ```
#[derive(Debug)]
pub struct ScriptedSession {
    source: Source,
}

impl ScriptedSession {
    /// A session with no frames that stays open.
    pub fn new() -> Self {
        Self {
            source: Source::Script {
                frames: VecDeque::new(),
                end: SessionEnd::Hold,
            },
        }
    }

    /// A session whose handshake fails.
    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            source: Source::Refuse(reason.into()),
        }
    }

    /// A session fed by the returned [`LiveSession`] handle.
    ///
    /// Dropping the handle ends the stream.
    pub fn live() -> (Self, LiveSession) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                source: Source::Live(rx),
            },
            LiveSession { tx },
        )
    }

    /// Append a frame. Ignored for refused and live sessions.
    pub fn frame(mut self, frame: InboundFrame) -> Self {
        if let Source::Script { frames, .. } = &mut self.source {
            frames.push_back(frame);
        }
        self
    }

    /// Append a complete text message.
    pub fn text(self, text: impl Into<String>) -> Self {
        self.frame(InboundFrame::text(text))
    }

    /// Append a text message split into `parts` fragments.
    pub fn fragmented(mut self, text: &str, parts: usize) -> Self {
        let bytes = text.as_bytes();
        let size = bytes.len().div_ceil(parts.max(1)).max(1);
        let count = bytes.len().div_ceil(size);
        for (index, chunk) in bytes.chunks(size).enumerate() {
            self = self.frame(InboundFrame::fragment(
                Bytes::copy_from_slice(chunk),
                index + 1 == count,
            ));
        }
        self
    }

    /// Append the first fragment of a message that never completes.
    pub fn partial(self, fragment: &str) -> Self {
        self.frame(InboundFrame::fragment(
            Bytes::copy_from_slice(fragment.as_bytes()),
            false,
        ))
    }

    /// End with a close frame from the service.
    pub fn then_close(self, code: CloseCode, reason: &str) -> Self {
        self.then(SessionEnd::Close(Some(CloseInfo::new(code, reason))))
    }

    /// End with a receive error.
    pub fn then_fail(self, reason: impl Into<String>) -> Self {
        self.then(SessionEnd::Fail(reason.into()))
    }

    /// End the stream without a close frame.
    pub fn then_end(self) -> Self {
        self.then(SessionEnd::EndOfStream)
    }

    /// Set how the session ends.
    pub fn then(mut self, ending: SessionEnd) -> Self {
        if let Source::Script { end, .. } = &mut self.source {
            *end = ending;
        }
        self
    }
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Feeds frames into a live session.
#[derive(Debug, Clone)]
pub struct LiveSession {
    tx: mpsc::UnboundedSender<InboundFrame>,
}

impl LiveSession {
    /// Deliver a frame. Returns `false` once the session's reader is gone.
    pub fn send(&self, frame: InboundFrame) -> bool {
        self.tx.send(frame).is_ok()
    }

    /// Deliver a complete text message.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(InboundFrame::text(text))
    }

    /// Deliver a close frame.
    pub fn close(&self, code: CloseCode, reason: &str) -> bool {
        self.send(InboundFrame::Close(Some(CloseInfo::new(code, reason))))
    }
}

/// One connection attempt seen by the connector.
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    /// When the attempt was made.
    pub at: Instant,
    /// Requested URL.
    pub url: Url,
    /// Whether the handshake succeeded.
    pub accepted: bool,
}

/// Connector replaying [`ScriptedSession`]s in order.
///
/// Cloning shares the script and the records, so a test can keep a handle
/// after moving the connector into a client. Attempts made after the
/// script runs out are refused.
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    inner: Arc<ConnectorInner>,
}

#[derive(Debug)]
struct ConnectorInner {
    sessions: Mutex<VecDeque<ScriptedSession>>,
    attempts: Mutex<Vec<ConnectAttempt>>,
    transcripts: Mutex<Vec<Transcript>>,
    attempt_count: watch::Sender<usize>,
}

impl ScriptedConnector {
    /// Connector replaying `sessions`.
    pub fn new(sessions: impl IntoIterator<Item = ScriptedSession>) -> Self {
        Self {
            inner: Arc::new(ConnectorInner {
                sessions: Mutex::new(sessions.into_iter().collect()),
                attempts: Mutex::new(Vec::new()),
                transcripts: Mutex::new(Vec::new()),
                attempt_count: watch::Sender::new(0),
            }),
        }
    }

    /// Queue another session.
    pub fn push_session(&self, session: ScriptedSession) {
        self.inner.sessions.lock().push_back(session);
    }

    /// Every attempt so far.
    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.inner.attempts.lock().clone()
    }

    /// Number of attempts so far.
    pub fn attempt_count(&self) -> usize {
        *self.inner.attempt_count.borrow()
    }

    /// Wait until at least `count` attempts were made.
    pub async fn wait_for_attempts(&self, count: usize, limit: Duration) -> Result<(), TestError> {
        let mut rx = self.inner.attempt_count.subscribe();
        tokio::time::timeout(limit, rx.wait_for(|seen| *seen >= count))
            .await
            .map_err(|_| TestError::timeout(limit, format!("{count} connection attempts")))?
            .map_err(|_| TestError::timeout(limit, format!("{count} connection attempts")))?;
        Ok(())
    }

    /// Transcript of the `index`-th accepted session.
    pub fn transcript(&self, index: usize) -> Result<Transcript, TestError> {
        self.inner
            .transcripts
            .lock()
            .get(index)
            .cloned()
            .ok_or(TestError::Missing("session", index))
    }

    /// Transcripts of every accepted session.
    pub fn transcripts(&self) -> Vec<Transcript> {
        self.inner.transcripts.lock().clone()
    }

    fn record(&self, url: &Url, accepted: bool) {
        self.inner.attempts.lock().push(ConnectAttempt {
            at: Instant::now(),
            url: url.clone(),
            accepted,
        });
        self.inner.attempt_count.send_modify(|count| *count += 1);
    }
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        Self::new([])
    }
}

impl Connector for ScriptedConnector {
    type Reader = ScriptedReader;
    type Writer = RecordingWriter;

    async fn connect(&self, url: &Url) -> StreamResult<(ScriptedReader, RecordingWriter)> {
        let next = self.inner.sessions.lock().pop_front();
        let source = match next.map(|session| session.source) {
            None => Err(StreamError::handshake_failed("no scripted session left")),
            Some(Source::Refuse(reason)) => Err(StreamError::handshake_failed(reason)),
            Some(Source::Script { frames, end }) => Ok(ReaderSource::Script {
                frames,
                end: Some(end),
            }),
            Some(Source::Live(rx)) => Ok(ReaderSource::Live(rx)),
        };
        self.record(url, source.is_ok());
        let source = source?;

        let transcript = Transcript::default();
        self.inner.transcripts.lock().push(transcript.clone());
        Ok((ScriptedReader { source }, RecordingWriter { transcript }))
    }
}

#[derive(Debug)]
enum ReaderSource {
    Script {
        frames: VecDeque<InboundFrame>,
        end: Option<SessionEnd>,
    },
    Live(mpsc::UnboundedReceiver<InboundFrame>),
}

/// Read half of a scripted session.
#[derive(Debug)]
pub struct ScriptedReader {
    source: ReaderSource,
}

impl FrameReader for ScriptedReader {
    async fn next_frame(&mut self) -> Option<StreamResult<InboundFrame>> {
        match &mut self.source {
            ReaderSource::Live(rx) => rx.recv().await.map(Ok),
            ReaderSource::Script { frames, end } => {
                if let Some(frame) = frames.pop_front() {
                    return Some(Ok(frame));
                }
                if matches!(end, Some(SessionEnd::Hold)) {
                    return std::future::pending().await;
                }
                match end.take() {
                    Some(SessionEnd::Close(info)) => Some(Ok(InboundFrame::Close(info))),
                    Some(SessionEnd::Fail(reason)) => Some(Err(StreamError::receive_failed(reason))),
                    Some(SessionEnd::EndOfStream | SessionEnd::Hold) | None => None,
                }
            }
        }
    }
}

/// Outbound frames and close of one session.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    inner: Arc<Mutex<TranscriptInner>>,
}

#[derive(Debug, Default)]
struct TranscriptInner {
    frames: Vec<OutboundFrame>,
    closed: Option<(CloseCode, String)>,
}

impl Transcript {
    /// Every frame written, in order.
    pub fn frames(&self) -> Vec<OutboundFrame> {
        self.inner.lock().frames.clone()
    }

    /// Written frames reassembled into complete text messages.
    pub fn messages(&self) -> Result<Vec<String>, TestError> {
        let inner = self.inner.lock();
        let mut messages = Vec::new();
        let mut current = Vec::new();
        for frame in &inner.frames {
            current.extend_from_slice(&frame.payload);
            if frame.fin {
                messages.push(String::from_utf8(std::mem::take(&mut current))?);
            }
        }
        Ok(messages)
    }

    /// Written messages parsed as JSON.
    pub fn json(&self) -> Result<Vec<serde_json::Value>, TestError> {
        self.messages()?
            .iter()
            .map(|message| serde_json::from_str(message).map_err(TestError::from))
            .collect()
    }

    /// Close code sent by the client, if it closed the session.
    pub fn close_code(&self) -> Option<CloseCode> {
        self.inner.lock().closed.as_ref().map(|(code, _)| *code)
    }
}

/// Write half of a scripted session.
#[derive(Debug)]
pub struct RecordingWriter {
    transcript: Transcript,
}

impl RecordingWriter {
    /// The transcript this writer records into.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }
}

impl FrameWriter for RecordingWriter {
    async fn send_frame(&mut self, frame: OutboundFrame) -> StreamResult<()> {
        let mut inner = self.transcript.inner.lock();
        if inner.closed.is_some() {
            return Err(StreamError::send_failed("session closed"));
        }
        inner.frames.push(frame);
        Ok(())
    }

    async fn close(&mut self, code: CloseCode, reason: &str) -> StreamResult<()> {
        self.transcript.inner.lock().closed = Some((code, reason.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("wss://push.example.test/streaming").unwrap()
    }

    async fn collect(reader: &mut ScriptedReader) -> Vec<StreamResult<InboundFrame>> {
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_sessions_replay_in_order() {
        let connector = ScriptedConnector::new([
            ScriptedSession::refused("busy"),
            ScriptedSession::new().text("{}").then_end(),
        ]);

        let err = connector.connect(&url()).await.unwrap_err();
        assert!(matches!(err, StreamError::HandshakeFailed(_)));

        let (mut reader, _writer) = connector.connect(&url()).await.unwrap();
        let frames = collect(&mut reader).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(*frames[0].as_ref().unwrap(), InboundFrame::text("{}"));

        assert!(connector.connect(&url()).await.is_err());
        let accepted: Vec<_> = connector.attempts().iter().map(|a| a.accepted).collect();
        assert_eq!(accepted, vec![false, true, false]);
        assert_eq!(connector.attempt_count(), 3);
    }

    #[tokio::test]
    async fn test_fragmented_marks_only_last_fin() {
        let connector =
            ScriptedConnector::new([ScriptedSession::new().fragmented("abcdefg", 3).then_end()]);
        let (mut reader, _) = connector.connect(&url()).await.unwrap();

        let fins: Vec<_> = collect(&mut reader)
            .await
            .into_iter()
            .map(|frame| match frame.unwrap() {
                InboundFrame::Data { fin, .. } => fin,
                InboundFrame::Close(_) => panic!("unexpected close"),
            })
            .collect();
        assert_eq!(fins, vec![false, false, true]);
    }

    #[tokio::test]
    async fn test_session_endings() {
        let connector = ScriptedConnector::new([
            ScriptedSession::new().then_close(CloseCode::GoingAway, "restart"),
            ScriptedSession::new().then_fail("reset"),
        ]);

        let (mut reader, _) = connector.connect(&url()).await.unwrap();
        let frames = collect(&mut reader).await;
        assert_eq!(
            *frames[0].as_ref().unwrap(),
            InboundFrame::Close(Some(CloseInfo::new(CloseCode::GoingAway, "restart")))
        );

        let (mut reader, _) = connector.connect(&url()).await.unwrap();
        let frames = collect(&mut reader).await;
        assert!(matches!(frames[0], Err(StreamError::ReceiveFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_never_yields() {
        let connector = ScriptedConnector::new([ScriptedSession::new()]);
        let (mut reader, _) = connector.connect(&url()).await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(60), reader.next_frame()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_live_session() {
        let (session, live) = ScriptedSession::live();
        let connector = ScriptedConnector::new([session]);
        let (mut reader, _) = connector.connect(&url()).await.unwrap();

        assert!(live.send_text("hello"));
        assert_eq!(reader.next_frame().await.unwrap().unwrap(), InboundFrame::text("hello"));
        drop(live);
        assert!(reader.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_transcript_reassembles_messages() {
        let connector = ScriptedConnector::new([ScriptedSession::new()]);
        let (_, mut writer) = connector.connect(&url()).await.unwrap();

        for (chunk, first, fin) in [("{\"a\":", true, false), ("1}", false, true)] {
            writer
                .send_frame(OutboundFrame {
                    payload: Bytes::from_static(chunk.as_bytes()),
                    first,
                    fin,
                })
                .await
                .unwrap();
        }
        writer.close(CloseCode::Normal, "bye").await.unwrap();

        let transcript = connector.transcript(0).unwrap();
        assert_eq!(transcript.frames().len(), 2);
        assert_eq!(transcript.json().unwrap(), vec![serde_json::json!({"a": 1})]);
        assert_eq!(transcript.close_code(), Some(CloseCode::Normal));

        let err = writer
            .send_frame(OutboundFrame {
                payload: Bytes::new(),
                first: true,
                fin: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::SendFailed(_)));
        assert!(matches!(connector.transcript(1), Err(TestError::Missing("session", 1))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_attempts_times_out() {
        let connector = ScriptedConnector::default();
        let err = connector
            .wait_for_attempts(1, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, TestError::Timeout(..)));
    }
}
