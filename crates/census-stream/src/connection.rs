//! Connection lifecycle.
//!
//! The [`ConnectionManager`] owns the socket: it performs handshakes,
//! installs the write half into the [`CommandSender`], closes gracefully,
//! and waits out the reconnection delay. It is the only component that
//! changes the published [`ConnectionState`].

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::ClientId;
use crate::config::StreamOptions;
use crate::credentials::ServiceIdStrategy;
use crate::error::{CloseCode, StreamError, StreamResult};
use crate::metrics;
use crate::sender::CommandSender;
use crate::transport::Connector;

const STOP_REASON: &str = "client stopping";

/// State of the client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not started.
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Connected.
    Open,
    /// Graceful close in progress.
    Closing,
    /// Closed, by the client or by a close frame from the service.
    Closed,
    /// Lost through a transport failure.
    Aborted,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Aborted, Closed, Closing, Connecting, Idle, Open};
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Open | Aborted | Closed)
                | (Open, Closing | Aborted | Closed)
                | (Closing, Closed)
                | (Aborted | Closed, Connecting)
                | (Aborted, Closed)
        )
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the socket of one client.
pub struct ConnectionManager<C: Connector> {
    client_id: ClientId,
    connector: C,
    options: Arc<StreamOptions>,
    strategy: Arc<dyn ServiceIdStrategy>,
    sender: Arc<CommandSender<C::Writer>>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    consecutive_failures: AtomicU32,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager in the [`Idle`](ConnectionState::Idle) state.
    pub fn new(
        client_id: ClientId,
        connector: C,
        options: Arc<StreamOptions>,
        strategy: Arc<dyn ServiceIdStrategy>,
        sender: Arc<CommandSender<C::Writer>>,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            client_id,
            connector,
            options,
            strategy,
            sender,
            state,
            cancel,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Failed connection attempts since the last successful handshake.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    fn transition(&self, next: ConnectionState) -> bool {
        let mut previous = next;
        let changed = self.state.send_if_modified(|state| {
            previous = *state;
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            info!(
                client_id = %self.client_id,
                from = %previous,
                state = %next,
                "Connection state changed"
            );
        } else if previous != next {
            debug!(
                client_id = %self.client_id,
                from = %previous,
                state = %next,
                "Ignoring illegal connection state transition"
            );
        }
        changed
    }

    /// Open a fresh connection, replacing any previous socket.
    ///
    /// Returns the read half; the write half goes to the command sender.
    #[instrument(skip(self), fields(client_id = %self.client_id))]
    pub async fn connect(&self) -> StreamResult<C::Reader> {
        if self.cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        self.transition(ConnectionState::Connecting);

        let attempt = self.consecutive_failures();
        let service_id = self.strategy.service_id(attempt);
        let url = self.options.connection_url(service_id)?;
        debug!(attempt, environment = %self.options.environment, "Connecting");

        let connected = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(StreamError::Cancelled),
            result = self.connector.connect(&url) => result,
        };

        let installed = match connected {
            Ok((reader, writer)) => self
                .sender
                .install_writer(writer)
                .await
                .map(|previous| (reader, previous)),
            Err(e) => Err(e),
        };

        match installed {
            Ok((reader, previous)) => {
                if previous.is_some() {
                    debug!("Discarded previous socket");
                }
                if self.cancel.is_cancelled() {
                    debug!("Stopped during handshake, closing the new socket");
                    if let Err(e) = self.sender.close_writer(CloseCode::Normal, STOP_REASON).await {
                        debug!(error = %e, "Failed to close socket opened during stop");
                    }
                    self.transition(ConnectionState::Closed);
                    return Err(StreamError::Cancelled);
                }
                self.consecutive_failures.store(0, Ordering::Relaxed);
                self.transition(ConnectionState::Open);
                Ok(reader)
            }
            Err(StreamError::Cancelled) => {
                self.transition(ConnectionState::Closed);
                Err(StreamError::Cancelled)
            }
            Err(e) => {
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                self.transition(ConnectionState::Aborted);
                Err(e)
            }
        }
    }

    /// Wait the reconnection delay, then make one connection attempt.
    pub async fn reconnect(&self) -> StreamResult<C::Reader> {
        let delay = self.options.reconnection_delay;
        debug!(
            client_id = %self.client_id,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting after delay"
        );
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(StreamError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
        metrics::record_reconnect();
        self.connect().await
    }

    /// Record a transport failure and drop the socket.
    pub async fn mark_aborted(&self, reason: &str) {
        self.drop_writer().await;
        if self.transition(ConnectionState::Aborted) {
            warn!(client_id = %self.client_id, reason, "Connection lost");
        }
    }

    /// Record a close by the service and drop the socket.
    ///
    /// `closed` is the [`StreamError::ConnectionClosed`] built from the close
    /// frame. Normal and going-away closes are logged at info, anything else
    /// at warn.
    pub async fn mark_closed(&self, closed: &StreamError) {
        self.drop_writer().await;
        if !self.transition(ConnectionState::Closed) {
            return;
        }
        let graceful = closed
            .close_code()
            .and_then(CloseCode::from_u16)
            .is_some_and(CloseCode::is_graceful);
        if graceful {
            info!(client_id = %self.client_id, error = %closed, "Connection closed by the service");
        } else {
            warn!(client_id = %self.client_id, error = %closed, "Connection closed by the service");
        }
    }

    /// Close the connection gracefully.
    ///
    /// Any installed socket gets a close frame, including one installed by a
    /// handshake that finished while the client was stopping.
    pub async fn close(&self) -> StreamResult<()> {
        self.transition(ConnectionState::Closing);
        let result = self
            .sender
            .close_writer(CloseCode::Normal, STOP_REASON)
            .await
            .map(|_| ());
        self.transition(ConnectionState::Closed);
        result
    }

    async fn drop_writer(&self) {
        if let Err(e) = self.sender.take_writer().await {
            warn!(client_id = %self.client_id, error = %e, "Could not release the socket");
        }
    }
}

impl<C: Connector> fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("client_id", &self.client_id)
            .field("state", &self.state())
            .field("consecutive_failures", &self.consecutive_failures())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use parking_lot::Mutex;
    use url::Url;

    use super::*;
    use crate::credentials::{FixedServiceId, RotatingServiceIds};
    use crate::transport::{CloseInfo, FrameReader, FrameWriter, InboundFrame, OutboundFrame};

    #[derive(Debug)]
    struct NullReader;

    impl FrameReader for NullReader {
        async fn next_frame(&mut self) -> Option<StreamResult<InboundFrame>> {
            None
        }
    }

    #[derive(Debug)]
    struct NullWriter {
        closes: Arc<Mutex<Vec<u16>>>,
    }

    impl FrameWriter for NullWriter {
        async fn send_frame(&mut self, _frame: OutboundFrame) -> StreamResult<()> {
            Ok(())
        }

        async fn close(&mut self, code: CloseCode, _reason: &str) -> StreamResult<()> {
            self.closes.lock().push(code.as_u16());
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct ListConnector {
        results: Mutex<VecDeque<bool>>,
        urls: Mutex<Vec<String>>,
        closes: Arc<Mutex<Vec<u16>>>,
        cancel_during_handshake: Mutex<Option<CancellationToken>>,
    }

    impl ListConnector {
        fn new(results: impl IntoIterator<Item = bool>) -> Self {
            Self {
                results: Mutex::new(results.into_iter().collect()),
                ..Self::default()
            }
        }
    }

    impl Connector for ListConnector {
        type Reader = NullReader;
        type Writer = NullWriter;

        async fn connect(&self, url: &Url) -> StreamResult<(NullReader, NullWriter)> {
            self.urls.lock().push(url.to_string());
            if !self.results.lock().pop_front().unwrap_or(false) {
                return Err(StreamError::handshake_failed("refused"));
            }
            if let Some(cancel) = self.cancel_during_handshake.lock().take() {
                cancel.cancel();
            }
            let writer = NullWriter {
                closes: self.closes.clone(),
            };
            Ok((NullReader, writer))
        }
    }

    fn manager(
        results: impl IntoIterator<Item = bool>,
        strategy: Arc<dyn ServiceIdStrategy>,
    ) -> (ConnectionManager<ListConnector>, CancellationToken) {
        let options = Arc::new(
            StreamOptions::new("example").reconnection_delay(Duration::from_secs(5)),
        );
        let cancel = CancellationToken::new();
        let sender = Arc::new(CommandSender::new(&options, cancel.clone()));
        let manager = ConnectionManager::new(
            ClientId::new(),
            ListConnector::new(results),
            options,
            strategy,
            sender,
            cancel.clone(),
        );
        (manager, cancel)
    }

    #[test]
    fn test_transitions() {
        use ConnectionState::*;
        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Open));
        assert!(Open.can_transition_to(Aborted));
        assert!(Aborted.can_transition_to(Connecting));
        assert!(Closed.can_transition_to(Connecting));
        assert!(Closing.can_transition_to(Closed));

        assert!(!Idle.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Closing.can_transition_to(Connecting));
        assert!(!Open.can_transition_to(Connecting));
    }

    #[tokio::test]
    async fn test_connect_opens_and_installs_writer() {
        let (manager, _) = manager([true], Arc::new(FixedServiceId::new("example")));
        let mut states = manager.subscribe_state();
        assert_eq!(manager.state(), ConnectionState::Idle);

        manager.connect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Open);
        assert!(manager.sender.is_connected().await);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_connect_failure_aborts() {
        let (manager, _) = manager([false], Arc::new(FixedServiceId::new("example")));
        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, StreamError::HandshakeFailed(_)));
        assert_eq!(manager.state(), ConnectionState::Aborted);
        assert_eq!(manager.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_waits_delay() {
        let (manager, _) = manager([true, true], Arc::new(FixedServiceId::new("example")));
        manager.connect().await.unwrap();
        manager.mark_aborted("reset").await;
        assert_eq!(manager.state(), ConnectionState::Aborted);
        assert!(!manager.sender.is_connected().await);

        let started = tokio::time::Instant::now();
        manager.reconnect().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.connector.urls.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_pending_until_delay_elapses() {
        let (manager, _) = manager([true, true], Arc::new(FixedServiceId::new("example")));
        manager.connect().await.unwrap();
        manager.mark_aborted("reset").await;

        let mut reconnect = tokio_test::task::spawn(manager.reconnect());
        tokio_test::assert_pending!(reconnect.poll());
        tokio::time::advance(Duration::from_secs(4)).await;
        tokio_test::assert_pending!(reconnect.poll());
        assert_eq!(manager.connector.urls.lock().len(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        tokio_test::assert_ready_ok!(reconnect.poll());
        assert_eq!(manager.connector.urls.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_cancelled_during_delay() {
        let (manager, cancel) = manager([true], Arc::new(FixedServiceId::new("example")));
        manager.connect().await.unwrap();
        manager.mark_aborted("reset").await;

        cancel.cancel();
        let err = manager.reconnect().await.unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(manager.connector.urls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_rotate_service_id() {
        let strategy = RotatingServiceIds::new(["primary", "backup"], 1).unwrap();
        let (manager, _) = manager([false, true, true], Arc::new(strategy));

        assert!(manager.connect().await.is_err());
        manager.connect().await.unwrap();
        manager.mark_aborted("reset").await;
        manager.connect().await.unwrap();

        let urls = manager.connector.urls.lock().clone();
        assert!(urls[0].ends_with("service-id=s:primary"));
        assert!(urls[1].ends_with("service-id=s:backup"));
        assert!(urls[2].ends_with("service-id=s:primary"));
    }

    #[tokio::test]
    async fn test_close_is_graceful_when_open() {
        let (manager, _) = manager([true], Arc::new(FixedServiceId::new("example")));
        manager.connect().await.unwrap();
        manager.close().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(!manager.sender.is_connected().await);
    }

    #[tokio::test]
    async fn test_close_sends_close_frame() {
        let (manager, _) = manager([true], Arc::new(FixedServiceId::new("example")));
        manager.connect().await.unwrap();
        manager.close().await.unwrap();
        assert_eq!(*manager.connector.closes.lock(), vec![1000]);
    }

    #[tokio::test]
    async fn test_remote_close_then_reconnect_allowed() {
        let (manager, _) = manager([true, true], Arc::new(FixedServiceId::new("example")));
        manager.connect().await.unwrap();
        let closed = StreamError::from(CloseInfo::new(CloseCode::GoingAway, "restart"));
        manager.mark_closed(&closed).await;
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(!manager.sender.is_connected().await);
        manager.connect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_abnormal_remote_close_drops_socket() {
        let (manager, _) = manager([true], Arc::new(FixedServiceId::new("example")));
        manager.connect().await.unwrap();
        manager
            .mark_closed(&StreamError::connection_closed(Some(1011), "internal error"))
            .await;
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(!manager.sender.is_connected().await);
        // the service already closed the socket, so no close frame goes back
        assert!(manager.connector.closes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_handshake_closes_new_socket() {
        let (manager, cancel) = manager([true], Arc::new(FixedServiceId::new("example")));
        *manager.connector.cancel_during_handshake.lock() = Some(cancel.clone());

        let err = manager.connect().await.unwrap_err();
        assert!(err.is_cancellation());
        assert!(cancel.is_cancelled());
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(!manager.sender.is_connected().await);
        assert_eq!(*manager.connector.closes.lock(), vec![1000]);
        assert_eq!(manager.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_close_while_connecting_still_closes_late_socket() {
        // the handshake finished and installed its socket, but the state
        // never reached Open before the client stopped
        let (manager, cancel) = manager([], Arc::new(FixedServiceId::new("example")));
        let writer = NullWriter {
            closes: manager.connector.closes.clone(),
        };
        manager.transition(ConnectionState::Connecting);
        manager.sender.install_writer(writer).await.unwrap();

        cancel.cancel();
        manager.close().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(!manager.sender.is_connected().await);
        assert_eq!(*manager.connector.closes.lock(), vec![1000]);
    }
}
