//! The event-stream client.
//!
//! [`EventStreamClient`] ties the pieces together: it owns the connection,
//! runs a single receive loop that reassembles frames, routes complete
//! messages and hands them to the dispatch engine, and exposes the command
//! API. Dispatches run in the background; the loop never waits on handlers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use census_stream::{
//!     EventStreamClient, FnHandler, HandlerRegistry, PayloadRegistry, ServiceMessage,
//!     StreamOptions, Subscribe,
//! };
//!
//! #[derive(Debug, serde::Deserialize)]
//! struct PlayerLogin {
//!     #[serde(deserialize_with = "census_stream::convert::number_from_str")]
//!     character_id: u64,
//! }
//!
//! # async fn run() -> census_stream::StreamResult<()> {
//! let mut payloads = PayloadRegistry::new();
//! payloads.register_event::<PlayerLogin>("PlayerLogin");
//!
//! let mut handlers = HandlerRegistry::new();
//! handlers.register::<ServiceMessage<PlayerLogin>, _>(FnHandler::new(
//!     |_ctx, login: Arc<ServiceMessage<PlayerLogin>>| async move {
//!         println!("{} logged in", login.payload.character_id);
//!         anyhow::Ok(())
//!     },
//! ));
//!
//! let client = EventStreamClient::websocket(StreamOptions::new("example"), payloads, handlers)?;
//! client.start().await?;
//! client.subscribe(Subscribe::new().event_names(["PlayerLogin"]).worlds(["all"])).await?;
//! # client.stop().await
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::command::{ClearSubscribe, Command, Echo, Subscribe, SubscriptionSet};
use crate::config::StreamOptions;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::credentials::{FixedServiceId, ServiceIdStrategy};
use crate::dispatch::DispatchEngine;
use crate::error::{CloseCode, StreamError, StreamResult};
use crate::filter::{DuplicateFilter, PreDispatchFilter};
use crate::frame::{FrameAssembler, SegmentPool};
use crate::metrics;
use crate::registry::{HandlerRegistry, PayloadRegistry};
use crate::router::PayloadRouter;
use crate::sender::CommandSender;
use crate::tracker::DispatchTracker;
use crate::transport::{Connector, FrameReader, InboundFrame};
use crate::ws::TungsteniteConnector;

/// Identifier of one client instance, attached to its logs and handler
/// contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Create a new time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ClientId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Builder for [`EventStreamClient`].
pub struct ClientBuilder<C: Connector> {
    options: StreamOptions,
    connector: C,
    payloads: PayloadRegistry,
    handlers: HandlerRegistry,
    strategy: Option<Arc<dyn ServiceIdStrategy>>,
    filters: Vec<Arc<dyn PreDispatchFilter>>,
    duplicate_filter: bool,
}

impl<C: Connector> ClientBuilder<C> {
    /// Choose the service id for each connection attempt.
    ///
    /// Defaults to always using the configured service id.
    pub fn with_service_id_strategy(mut self, strategy: impl ServiceIdStrategy) -> Self {
        self.strategy = Some(Arc::new(strategy));
        self
    }

    /// Append a filter, run after the built-in duplicate filter.
    pub fn with_filter(mut self, filter: impl PreDispatchFilter) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Leave out the duplicate filter configured by
    /// [`StreamOptions::duplicate_window`].
    pub fn without_duplicate_filter(mut self) -> Self {
        self.duplicate_filter = false;
        self
    }

    /// Validate the options and build the client.
    pub fn build(self) -> StreamResult<EventStreamClient<C>> {
        self.options.validate()?;

        let client_id = ClientId::new();
        let options = Arc::new(self.options);
        let cancel = CancellationToken::new();
        let strategy = self
            .strategy
            .unwrap_or_else(|| Arc::new(FixedServiceId::new(options.service_id.clone())));

        let sender = Arc::new(CommandSender::new(&options, cancel.clone()));
        let connection = Arc::new(ConnectionManager::new(
            client_id,
            self.connector,
            Arc::clone(&options),
            strategy,
            Arc::clone(&sender),
            cancel.clone(),
        ));

        let mut engine = DispatchEngine::new(Arc::new(self.handlers), client_id, cancel.clone());
        if self.duplicate_filter && options.duplicate_window > 0 {
            engine = engine.with_filter(Arc::new(DuplicateFilter::new(options.duplicate_window)));
        }
        for filter in self.filters {
            engine = engine.with_filter(filter);
        }

        debug!(
            %client_id,
            events = ?self.payloads.event_names().collect::<Vec<_>>(),
            "Event stream client created"
        );

        Ok(EventStreamClient {
            client_id,
            options,
            connection,
            sender,
            router: Arc::new(PayloadRouter::new(Arc::new(self.payloads))),
            engine: Arc::new(engine),
            subscriptions: Arc::new(Mutex::new(SubscriptionSet::default())),
            outstanding: Arc::new(AtomicUsize::new(0)),
            cancel,
            started: AtomicBool::new(false),
            receive_loop: tokio::sync::Mutex::new(None),
        })
    }
}

impl<C: Connector> fmt::Debug for ClientBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("options", &self.options)
            .field("strategy", &self.strategy)
            .field("filters", &self.filters)
            .field("duplicate_filter", &self.duplicate_filter)
            .finish_non_exhaustive()
    }
}

/// Client for the push event stream.
///
/// A client runs once: after [`stop`](Self::stop) it cannot be started
/// again. Dropping a running client cancels its receive loop.
pub struct EventStreamClient<C: Connector> {
    client_id: ClientId,
    options: Arc<StreamOptions>,
    connection: Arc<ConnectionManager<C>>,
    sender: Arc<CommandSender<C::Writer>>,
    router: Arc<PayloadRouter>,
    engine: Arc<DispatchEngine>,
    subscriptions: Arc<Mutex<SubscriptionSet>>,
    outstanding: Arc<AtomicUsize>,
    cancel: CancellationToken,
    started: AtomicBool,
    receive_loop: tokio::sync::Mutex<Option<JoinHandle<DispatchTracker>>>,
}

impl EventStreamClient<TungsteniteConnector> {
    /// Client connecting over a real WebSocket.
    pub fn websocket(
        options: StreamOptions,
        payloads: PayloadRegistry,
        handlers: HandlerRegistry,
    ) -> StreamResult<Self> {
        Self::new(options, TungsteniteConnector, payloads, handlers)
    }
}

impl<C: Connector> EventStreamClient<C> {
    /// Start building a client.
    pub fn builder(
        options: StreamOptions,
        connector: C,
        payloads: PayloadRegistry,
        handlers: HandlerRegistry,
    ) -> ClientBuilder<C> {
        ClientBuilder {
            options,
            connector,
            payloads,
            handlers,
            strategy: None,
            filters: Vec::new(),
            duplicate_filter: true,
        }
    }

    /// Build a client with the default strategy and filters.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidOptions`] when `options` fail validation.
    pub fn new(
        options: StreamOptions,
        connector: C,
        payloads: PayloadRegistry,
        handlers: HandlerRegistry,
    ) -> StreamResult<Self> {
        Self::builder(options, connector, payloads, handlers).build()
    }

    /// This client's id.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// The validated options.
    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Receiver notified on every connection state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    /// Dispatches currently in flight.
    pub fn outstanding_dispatches(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Subscriptions that would be replayed after a reconnect.
    pub fn subscriptions(&self) -> SubscriptionSet {
        self.subscriptions.lock().clone()
    }

    /// Connect and start the receive loop.
    ///
    /// # Errors
    ///
    /// Fails with [`StreamError::AlreadyStarted`] on a second call, or with
    /// the connection error when the initial handshake fails. In the latter
    /// case the client is left closed and `start` may be called again.
    pub async fn start(&self) -> StreamResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(StreamError::AlreadyStarted);
        }

        let reader = match self.connection.connect().await {
            Ok(reader) => reader,
            Err(e) => {
                error!(client_id = %self.client_id, error = %e, "Initial connection failed");
                self.connection.close().await.ok();
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let receive_loop = ReceiveLoop {
            client_id: self.client_id,
            options: Arc::clone(&self.options),
            connection: Arc::clone(&self.connection),
            sender: Arc::clone(&self.sender),
            router: Arc::clone(&self.router),
            engine: Arc::clone(&self.engine),
            subscriptions: Arc::clone(&self.subscriptions),
            assembler: FrameAssembler::new(SegmentPool::default()),
            tracker: DispatchTracker::with_counter(
                self.options.max_outstanding_dispatches,
                Arc::clone(&self.outstanding),
            ),
            cancel: self.cancel.clone(),
        };
        *self.receive_loop.lock().await = Some(tokio::spawn(receive_loop.run(reader)));

        info!(client_id = %self.client_id, "Event stream client started");
        Ok(())
    }

    /// Stop the client.
    ///
    /// Cancels the receive loop and in-flight sends, closes the socket
    /// gracefully and waits for outstanding dispatches up to the configured
    /// shutdown grace period.
    ///
    /// # Errors
    ///
    /// Fails with [`StreamError::NotStarted`] when the client is not running,
    /// or with the transport error raised while sending the close frame.
    pub async fn stop(&self) -> StreamResult<()> {
        let Some(handle) = self.receive_loop.lock().await.take() else {
            return Err(StreamError::NotStarted);
        };

        self.cancel.cancel();
        let closed = self.connection.close().await;
        if let Err(e) = &closed {
            warn!(client_id = %self.client_id, error = %e, "Failed to close connection cleanly");
        }

        let aborted = match handle.await {
            Ok(mut tracker) => tracker.drain(self.options.shutdown_grace).await,
            Err(e) => {
                error!(client_id = %self.client_id, error = %e, "Receive loop failed");
                0
            }
        };
        match self.sender.close_writer(CloseCode::Normal, "client stopping").await {
            Ok(true) => debug!(client_id = %self.client_id, "Closed socket opened while stopping"),
            Ok(false) => {}
            Err(e) => warn!(client_id = %self.client_id, error = %e, "Failed to close late socket"),
        }
        info!(client_id = %self.client_id, aborted, "Event stream client stopped");
        closed
    }

    /// Serialize and send any command.
    ///
    /// # Errors
    ///
    /// [`StreamError::NotConnected`] while no socket is open,
    /// [`StreamError::SendTimeout`] when the send lock is not acquired in
    /// time, [`StreamError::Cancelled`] when the client stops, or the
    /// transport error.
    pub async fn send_command<T>(&self, command: &T) -> StreamResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        self.sender.send(command).await
    }

    /// Subscribe to events and remember the subscription for replay.
    pub async fn subscribe(&self, subscribe: Subscribe) -> StreamResult<()> {
        let command = Command::Subscribe(subscribe);
        self.sender.send(&command).await?;
        if let Command::Subscribe(subscribe) = &command {
            self.subscriptions.lock().apply_subscribe(subscribe);
        }
        Ok(())
    }

    /// Clear subscriptions and forget them for replay.
    pub async fn clear_subscribe(&self, clear: ClearSubscribe) -> StreamResult<()> {
        let command = Command::ClearSubscribe(clear);
        self.sender.send(&command).await?;
        if let Command::ClearSubscribe(clear) = &command {
            self.subscriptions.lock().apply_clear(clear);
        }
        Ok(())
    }

    /// Ask the service to echo `payload` back.
    pub async fn echo(&self, payload: serde_json::Value) -> StreamResult<()> {
        self.sender.send(&Command::from(Echo::new(payload))).await
    }

    /// Ask for the ids of recently active characters.
    pub async fn recent_character_ids(&self) -> StreamResult<()> {
        self.sender.send(&Command::recent_character_ids()).await
    }

    /// Ask for the number of recently active characters.
    pub async fn recent_character_ids_count(&self) -> StreamResult<()> {
        self.sender.send(&Command::recent_character_ids_count()).await
    }
}

impl<C: Connector> fmt::Debug for EventStreamClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStreamClient")
            .field("client_id", &self.client_id)
            .field("state", &self.state())
            .field("outstanding_dispatches", &self.outstanding_dispatches())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Drop for EventStreamClient<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ReceiveLoop<C: Connector> {
    client_id: ClientId,
    options: Arc<StreamOptions>,
    connection: Arc<ConnectionManager<C>>,
    sender: Arc<CommandSender<C::Writer>>,
    router: Arc<PayloadRouter>,
    engine: Arc<DispatchEngine>,
    subscriptions: Arc<Mutex<SubscriptionSet>>,
    assembler: FrameAssembler,
    tracker: DispatchTracker,
    cancel: CancellationToken,
}

impl<C: Connector> ReceiveLoop<C> {
    async fn run(mut self, mut reader: C::Reader) -> DispatchTracker {
        loop {
            self.tracker.reap_one();

            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                frame = reader.next_frame() => frame,
            };

            match next {
                Some(Ok(InboundFrame::Data { payload, fin })) => {
                    self.on_data(&payload, fin).await;
                    continue;
                }
                Some(Ok(InboundFrame::Close(info))) => {
                    self.discard_partial();
                    let closed = info.map_or_else(
                        || StreamError::connection_closed(None, "closed without a status"),
                        StreamError::from,
                    );
                    self.connection.mark_closed(&closed).await;
                }
                Some(Err(e)) => {
                    self.discard_partial();
                    self.connection.mark_aborted(&e.to_string()).await;
                }
                None => {
                    self.discard_partial();
                    self.connection.mark_aborted("stream ended").await;
                }
            }

            match self.reconnect().await {
                Some(next_reader) => reader = next_reader,
                None => break,
            }
        }

        self.discard_partial();
        debug!(client_id = %self.client_id, "Receive loop finished");
        self.tracker
    }

    async fn on_data(&mut self, fragment: &[u8], fin: bool) {
        let Some(sequence) = self.assembler.push(fragment, fin) else {
            return;
        };
        let routed = self.router.route(&sequence);
        self.assembler.release();

        let Some(payload) = routed else {
            return;
        };
        metrics::record_message(payload.kind());

        let ctx = self.engine.context(&payload);
        if self.engine.screen(&payload, &ctx).is_some() {
            return;
        }
        if !self.engine.has_handlers(&payload) {
            trace!(payload_type = payload.type_name(), "No handlers registered");
            return;
        }

        let engine = Arc::clone(&self.engine);
        self.tracker
            .track(async move { engine.fan_out(payload, ctx).await })
            .await;
    }

    fn discard_partial(&mut self) {
        let dropped = self.assembler.abandon();
        if dropped > 0 {
            debug!(
                client_id = %self.client_id,
                bytes = dropped,
                "Discarded partial message"
            );
        }
    }

    /// Reconnect until it succeeds or the client stops.
    async fn reconnect(&mut self) -> Option<C::Reader> {
        loop {
            match self.connection.reconnect().await {
                Ok(reader) => {
                    self.replay_subscriptions().await;
                    return Some(reader);
                }
                Err(e) if e.is_cancellation() => return None,
                Err(e) => warn!(
                    client_id = %self.client_id,
                    attempt = self.connection.consecutive_failures(),
                    error = %e,
                    "Reconnection failed"
                ),
            }
            self.tracker.reap_one();
        }
    }

    async fn replay_subscriptions(&self) {
        if !self.options.resubscribe_on_reconnect {
            return;
        }
        let Some(subscribe) = self.subscriptions.lock().to_subscribe() else {
            return;
        };
        match self.sender.send(&Command::from(subscribe)).await {
            Ok(()) => debug!(client_id = %self.client_id, "Replayed subscriptions"),
            Err(e) => warn!(
                client_id = %self.client_id,
                error = %e,
                "Failed to replay subscriptions"
            ),
        }
    }
}
