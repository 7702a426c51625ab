//! Envelope resolution.
//!
//! Every complete inbound message is classified in one pass:
//!
//! 1. Messages that are not JSON are unknown.
//! 2. Messages with string `service` and `type` fields are control messages
//!    looked up by `type`, except `serviceMessage`, which is looked up by
//!    `payload.event_name`.
//! 3. Messages with a top-level `subscription` are acknowledgements.
//! 4. Anything else is unknown.
//!
//! Unknown messages are still dispatched, as [`UnknownPayload`] carrying
//! the raw text. A recognised message that fails to decode is logged and
//! dropped.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, trace, warn};

use crate::frame::MessageSequence;
use crate::metrics;
use crate::payload::{PayloadKind, UnknownPayload};
use crate::registry::{PayloadDescriptor, PayloadRegistry};

/// A decoded payload ready for dispatch.
#[derive(Clone)]
pub struct RoutedPayload {
    type_key: TypeId,
    type_name: &'static str,
    kind: PayloadKind,
    value: Arc<dyn Any + Send + Sync>,
    content_hash: u64,
}

impl RoutedPayload {
    /// Wrap an already decoded payload.
    pub fn new<P>(value: P, kind: PayloadKind, content_hash: u64) -> Self
    where
        P: Send + Sync + 'static,
    {
        Self {
            type_key: TypeId::of::<P>(),
            type_name: std::any::type_name::<P>(),
            kind,
            value: Arc::new(value),
            content_hash,
        }
    }

    fn from_descriptor(
        descriptor: &PayloadDescriptor,
        value: Arc<dyn Any + Send + Sync>,
        content_hash: u64,
    ) -> Self {
        Self {
            type_key: descriptor.type_key(),
            type_name: descriptor.type_name(),
            kind: descriptor.kind(),
            value,
            content_hash,
        }
    }

    /// An unknown payload holding `raw`.
    pub fn unknown(raw: String, content_hash: u64) -> Self {
        Self::new(UnknownPayload { raw }, PayloadKind::Unknown, content_hash)
    }

    /// Type key used to find handlers.
    pub fn type_key(&self) -> TypeId {
        self.type_key
    }

    /// Rust type name of the payload.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Payload category.
    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Hash of the raw message bytes.
    pub fn content_hash(&self) -> u64 {
        self.content_hash
    }

    /// Borrow the payload as `P`.
    pub fn downcast_ref<P: 'static>(&self) -> Option<&P> {
        self.value.downcast_ref::<P>()
    }

    pub(crate) fn value(&self) -> Arc<dyn Any + Send + Sync> {
        Arc::clone(&self.value)
    }
}

impl fmt::Debug for RoutedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutedPayload")
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .field("content_hash", &format_args!("{:016x}", self.content_hash))
            .finish_non_exhaustive()
    }
}

/// Resolves and decodes complete messages.
#[derive(Debug, Clone)]
pub struct PayloadRouter {
    payloads: Arc<PayloadRegistry>,
}

impl PayloadRouter {
    /// Create a router over `payloads`.
    pub fn new(payloads: Arc<PayloadRegistry>) -> Self {
        Self { payloads }
    }

    /// Classify and decode one message.
    ///
    /// Returns `None` when a recognised message fails to decode.
    pub fn route(&self, sequence: &MessageSequence<'_>) -> Option<RoutedPayload> {
        let content_hash = sequence.content_hash();

        let value: Value = match serde_json::from_reader(sequence.reader()) {
            Ok(value) => value,
            Err(e) => {
                let raw = sequence.to_text();
                warn!(error = %e, raw = %raw, "Received a message that is not JSON");
                return Some(RoutedPayload::unknown(raw, content_hash));
            }
        };

        let descriptor = match self.resolve(&value) {
            Ok(descriptor) => descriptor,
            Err(reason) => {
                let raw = sequence.to_text();
                warn!(reason = %reason, raw = %raw, "Received an unrecognised message");
                return Some(RoutedPayload::unknown(raw, content_hash));
            }
        };

        match descriptor.decode(value) {
            Ok(decoded) => {
                trace!(
                    payload_type = descriptor.type_name(),
                    bytes = sequence.len(),
                    "Decoded message"
                );
                Some(RoutedPayload::from_descriptor(
                    descriptor,
                    decoded,
                    content_hash,
                ))
            }
            Err(e) => {
                metrics::record_decode_failure(descriptor.type_name());
                error!(
                    payload_type = descriptor.type_name(),
                    error = %e,
                    raw = %sequence.to_text(),
                    "Failed to decode message, skipping"
                );
                None
            }
        }
    }

    fn resolve(&self, value: &Value) -> Result<&PayloadDescriptor, Unresolved> {
        let Some(object) = value.as_object() else {
            return Err(Unresolved::NotAnObject);
        };

        let service = object.get("service").and_then(Value::as_str);
        let message_type = object.get("type").and_then(Value::as_str);

        match (service, message_type) {
            (Some(_), Some("serviceMessage")) => {
                let event_name = object
                    .get("payload")
                    .and_then(|payload| payload.get("event_name"))
                    .and_then(Value::as_str)
                    .ok_or(Unresolved::MissingEventName)?;
                self.payloads
                    .event(event_name)
                    .ok_or_else(|| Unresolved::UnregisteredEvent(event_name.to_owned()))
            }
            (Some(_), Some(other)) => self
                .payloads
                .control(other)
                .ok_or_else(|| Unresolved::UnknownType(other.to_owned())),
            _ if object.contains_key("subscription") => Ok(self.payloads.subscription()),
            _ => Err(Unresolved::NoDiscriminator),
        }
    }
}

#[derive(Debug)]
enum Unresolved {
    NotAnObject,
    MissingEventName,
    UnregisteredEvent(String),
    UnknownType(String),
    NoDiscriminator,
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject => f.write_str("not a JSON object"),
            Self::MissingEventName => f.write_str("service message without an event_name"),
            Self::UnregisteredEvent(name) => write!(f, "no payload registered for event {name}"),
            Self::UnknownType(t) => write!(f, "unknown message type {t}"),
            Self::NoDiscriminator => f.write_str("no service/type or subscription field"),
        }
    }
}
