//! Event-stream client for the Census game-data service.
//!
//! The service pushes game events over a WebSocket. This crate keeps that
//! connection alive, reassembles fragmented frames from pooled memory,
//! routes each complete message to a strongly typed payload and fans it out
//! to every handler registered for that type.
//!
//! # Features
//!
//! - **Automatic reconnection** after a fixed delay, with subscription replay
//! - **Pooled frame reassembly**; segments return to the pool on drop
//! - **Registry-driven routing** from wire discriminators to payload types
//! - **Isolated handlers**: one failing or panicking handler never affects another
//! - **Duplicate suppression** for events the service repeats
//! - **Bounded sends**: a stalled socket surfaces as a timeout, never a hang
//!
//! # Architecture
//!
//! ```text
//! socket ──► FrameReader ──► FrameAssembler ──► PayloadRouter ──► DispatchEngine
//!                                (segments)       (registry)       (filters, handlers)
//!
//! caller ──► EventStreamClient ──► CommandSender ──► ChunkBuffer ──► FrameWriter
//! ```
//!
//! [`ConnectionManager`] owns the socket and the published
//! [`ConnectionState`]; the receive loop in [`EventStreamClient`] is the only
//! reader, and [`CommandSender`] the only writer.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use census_stream::{
//!     DispatchContext, EventStreamClient, FnHandler, HandlerRegistry, Heartbeat, PayloadRegistry,
//!     StreamOptions,
//! };
//!
//! # async fn run() -> census_stream::StreamResult<()> {
//! let mut handlers = HandlerRegistry::new();
//! handlers.register::<Heartbeat, _>(FnHandler::new(
//!     |_ctx: DispatchContext, beat: Arc<Heartbeat>| async move {
//!         tracing::info!(endpoints = beat.online.len(), "heartbeat");
//!         anyhow::Ok(())
//!     },
//! ));
//!
//! let client = EventStreamClient::websocket(
//!     StreamOptions::new("example"),
//!     PayloadRegistry::new(),
//!     handlers,
//! )?;
//! client.start().await?;
//! # client.stop().await
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/census-stream/0.1.0")]

pub mod buffer;
pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod convert;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod frame;
pub mod handler;
pub mod metrics;
pub mod payload;
pub mod registry;
pub mod router;
pub mod sender;
pub mod tracker;
pub mod transport;
pub mod ws;

pub use buffer::ChunkBuffer;
pub use client::{ClientBuilder, ClientId, EventStreamClient};
pub use command::{ClearSubscribe, Command, Echo, Service, Subscribe, SubscriptionSet};
pub use config::StreamOptions;
pub use connection::{ConnectionManager, ConnectionState};
pub use credentials::{FixedServiceId, RotatingServiceIds, ServiceIdStrategy};
pub use dispatch::{DispatchEngine, DispatchOutcome, DispatchReport, HandlerFailure};
pub use error::{CloseCode, StreamError, StreamResult};
pub use filter::{DuplicateFilter, FilterVerdict, PreDispatchFilter};
pub use frame::{FrameAssembler, MessageSequence, Segment, SegmentPool};
pub use handler::{DispatchContext, FnHandler, PayloadHandler};
pub use payload::{
    ConnectionStateChanged, Heartbeat, PayloadKind, ServiceMessage, ServiceStateChanged,
    SubscriptionAck, SubscriptionDetails, UnknownPayload,
};
pub use registry::{HandlerRegistry, PayloadDescriptor, PayloadRegistry};
pub use router::{PayloadRouter, RoutedPayload};
pub use sender::CommandSender;
pub use tracker::DispatchTracker;
pub use transport::{CloseInfo, Connector, FrameReader, FrameWriter, InboundFrame, OutboundFrame};
pub use ws::TungsteniteConnector;
