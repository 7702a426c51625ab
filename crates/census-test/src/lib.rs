//! # Census Test
//!
//! Test utilities for `census-stream`: drive an [`EventStreamClient`] end to
//! end without a network.
//!
//! - **Scripted transport**: [`ScriptedConnector`] replays one
//!   [`ScriptedSession`] per connection attempt and records what the client
//!   writes
//! - **Recording handlers**: [`RecordingHandler`] and [`FailingHandler`]
//! - **Fixtures**: JSON builders for every envelope the service sends
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use census_stream::{EventStreamClient, HandlerRegistry, PayloadRegistry, ServiceMessage, StreamOptions};
//! use census_test::{fixtures, RecordingHandler, ScriptedConnector, ScriptedSession};
//! use census_test::fixtures::PlayerLogin;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let connector = ScriptedConnector::new([
//!     ScriptedSession::new().text(fixtures::player_login(123, 17, 0)),
//! ]);
//!
//! let mut payloads = PayloadRegistry::new();
//! payloads.register_event::<PlayerLogin>("PlayerLogin");
//! let logins = RecordingHandler::<ServiceMessage<PlayerLogin>>::new();
//! let mut handlers = HandlerRegistry::new();
//! handlers.register::<ServiceMessage<PlayerLogin>, _>(logins.clone());
//!
//! let client =
//!     EventStreamClient::new(StreamOptions::new("example"), connector, payloads, handlers).unwrap();
//! client.start().await.unwrap();
//! let seen = logins.wait_for(1, Duration::from_secs(5)).await.unwrap();
//! assert_eq!(seen[0].payload.character_id, 123);
//! client.stop().await.unwrap();
//! # }
//! ```
//!
//! [`EventStreamClient`]: census_stream::EventStreamClient

#![doc(html_root_url = "https://docs.rs/census-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod fixtures;
mod handlers;
mod transport;

pub use error::TestError;
pub use handlers::{FailingHandler, RecordingHandler};
pub use transport::{
    ConnectAttempt, LiveSession, RecordingWriter, ScriptedConnector, ScriptedReader,
    ScriptedSession, SessionEnd, Transcript,
};
