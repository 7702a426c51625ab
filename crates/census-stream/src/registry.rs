//! Payload and handler registries.
//!
//! Both registries are plain values built by the application and handed to
//! the client. The [`PayloadRegistry`] maps wire discriminators to payload
//! types and builds each type's decoder once, at registration. The
//! [`HandlerRegistry`] maps payload types to their handlers in registration
//! order.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::{StreamError, StreamResult};
use crate::handler::{ErasedHandler, PayloadHandler, TypedHandler};
use crate::payload::{
    ConnectionStateChanged, Heartbeat, PayloadKind, ServiceMessage, ServiceStateChanged,
    SubscriptionAck,
};

type DecodeFn =
    Arc<dyn Fn(serde_json::Value) -> StreamResult<Arc<dyn Any + Send + Sync>> + Send + Sync>;

/// How to decode one payload type.
#[derive(Clone)]
pub struct PayloadDescriptor {
    type_key: TypeId,
    type_name: &'static str,
    kind: PayloadKind,
    decode: DecodeFn,
}

impl PayloadDescriptor {
    /// Descriptor for `P`.
    pub fn of<P>(kind: PayloadKind) -> Self
    where
        P: DeserializeOwned + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<P>();
        Self {
            type_key: TypeId::of::<P>(),
            type_name,
            kind,
            decode: Arc::new(move |value| {
                serde_json::from_value::<P>(value)
                    .map(|p| Arc::new(p) as Arc<dyn Any + Send + Sync>)
                    .map_err(|e| StreamError::decode_failed(type_name, e))
            }),
        }
    }

    /// Type key of the payload.
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

    /// Decode a parsed message into the payload type.
    pub fn decode(&self, value: serde_json::Value) -> StreamResult<Arc<dyn Any + Send + Sync>> {
        (self.decode)(value)
    }
}

impl fmt::Debug for PayloadDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadDescriptor")
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Maps wire discriminators to payload types.
///
/// The control messages (`connectionStateChanged`, `heartbeat`,
/// `serviceStateChanged`) and subscription acknowledgements are registered
/// by [`PayloadRegistry::new`]. Game events are added with
/// [`register_event`](Self::register_event).
#[derive(Debug, Clone)]
pub struct PayloadRegistry {
    control: HashMap<&'static str, PayloadDescriptor>,
    subscription: PayloadDescriptor,
    events: HashMap<String, PayloadDescriptor>,
}

impl PayloadRegistry {
    /// Registry with the built-in control payloads.
    pub fn new() -> Self {
        let control = HashMap::from([
            (
                "connectionStateChanged",
                PayloadDescriptor::of::<ConnectionStateChanged>(PayloadKind::Control),
            ),
            (
                "heartbeat",
                PayloadDescriptor::of::<Heartbeat>(PayloadKind::Control),
            ),
            (
                "serviceStateChanged",
                PayloadDescriptor::of::<ServiceStateChanged>(PayloadKind::Control),
            ),
        ]);
        Self {
            control,
            subscription: PayloadDescriptor::of::<SubscriptionAck>(PayloadKind::Subscription),
            events: HashMap::new(),
        }
    }

    /// Register event type `E` under its `event_name`.
    ///
    /// Messages are decoded as [`ServiceMessage<E>`], which is the type
    /// handlers register for. Registering a name twice replaces the earlier
    /// type.
    pub fn register_event<E>(&mut self, event_name: impl Into<String>) -> &mut Self
    where
        E: DeserializeOwned + Send + Sync + 'static,
    {
        self.events.insert(
            event_name.into(),
            PayloadDescriptor::of::<ServiceMessage<E>>(PayloadKind::ServiceMessage),
        );
        self
    }

    /// Descriptor for a control message `type`.
    pub fn control(&self, message_type: &str) -> Option<&PayloadDescriptor> {
        self.control.get(message_type)
    }

    /// Descriptor for subscription acknowledgements.
    pub fn subscription(&self) -> &PayloadDescriptor {
        &self.subscription
    }

    /// Descriptor for a service message `event_name`.
    pub fn event(&self, event_name: &str) -> Option<&PayloadDescriptor> {
        self.events.get(event_name)
    }

    /// Registered event names.
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.events.keys().map(String::as_str)
    }
}

impl Default for PayloadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps payload types to their handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TypeId, Vec<Arc<dyn ErasedHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handler` for payloads of type `P`.
    ///
    /// Any number of handlers may be registered for the same type; they are
    /// invoked in registration order.
    pub fn register<P, H>(&mut self, handler: H) -> &mut Self
    where
        P: Send + Sync + 'static,
        H: PayloadHandler<P>,
    {
        self.handlers
            .entry(TypeId::of::<P>())
            .or_default()
            .push(Arc::new(TypedHandler::<P, H>::new(handler)));
        self
    }

    /// Number of handlers registered for `type_key`.
    pub fn count(&self, type_key: TypeId) -> usize {
        self.handlers.get(&type_key).map_or(0, Vec::len)
    }

    /// Number of handlers registered for `P`.
    pub fn count_for<P: 'static>(&self) -> usize {
        self.count(TypeId::of::<P>())
    }

    pub(crate) fn handlers(&self, type_key: TypeId) -> &[Arc<dyn ErasedHandler>] {
        self.handlers
            .get(&type_key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.handlers.len())
            .field(
                "handlers",
                &self.handlers.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}
