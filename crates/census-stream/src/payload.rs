//! Inbound payload contracts.
//!
//! Control messages (connection state, heartbeats, service state) and
//! subscription acknowledgements have fixed shapes defined here. Game events
//! arrive wrapped in a [`ServiceMessage`] whose `payload` is a host-defined
//! event type registered with the
//! [`PayloadRegistry`](crate::PayloadRegistry).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::convert;

/// Broad category of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Connection state, heartbeat and service state messages.
    Control,
    /// A game event.
    ServiceMessage,
    /// A subscription acknowledgement.
    Subscription,
    /// Anything the client could not classify.
    Unknown,
}

impl PayloadKind {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::ServiceMessage => "service_message",
            Self::Subscription => "subscription",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The push service's connection state changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStateChanged {
    /// Whether the service considers the client connected.
    #[serde(deserialize_with = "convert::bool_from_str")]
    pub connected: bool,
}

/// Periodic heartbeat listing the online state of each event server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Endpoint name to online flag.
    #[serde(deserialize_with = "online_map")]
    pub online: BTreeMap<String, bool>,
}

impl Heartbeat {
    /// Online state of one endpoint, if reported.
    pub fn is_online(&self, endpoint: &str) -> Option<bool> {
        self.online.get(endpoint).copied()
    }
}

/// An event server went online or offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStateChanged {
    /// Endpoint name.
    pub detail: String,
    /// New online state.
    #[serde(deserialize_with = "convert::bool_from_str")]
    pub online: bool,
}

/// Acknowledgement of the current subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionAck {
    /// The subscription as the service sees it.
    pub subscription: SubscriptionDetails,
}

/// Subscription contents reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionDetails {
    /// Number of subscribed characters.
    #[serde(deserialize_with = "convert::number_from_str")]
    pub character_count: u64,
    /// Subscribed character ids, when listed.
    pub characters: Vec<String>,
    /// Subscribed event names.
    pub event_names: Vec<String>,
    /// Subscribed world ids.
    pub worlds: Vec<String>,
    /// Conjunction flag.
    #[serde(deserialize_with = "convert::bool_from_str")]
    pub logical_and_characters_with_worlds: bool,
}

/// A game event of type `E`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMessage<E> {
    /// Originating service.
    pub service: String,
    /// Message type, always `serviceMessage`.
    #[serde(rename = "type")]
    pub message_type: String,
    /// The event.
    pub payload: E,
}

/// A message that could not be classified. Holds the raw text verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPayload {
    /// Raw message text.
    pub raw: String,
}

impl UnknownPayload {
    /// Wrap raw message text.
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }
}

fn online_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Flag(#[serde(deserialize_with = "convert::bool_from_str")] bool);

    let map = BTreeMap::<String, Flag>::deserialize(deserializer)?;
    Ok(map.into_iter().map(|(k, Flag(v))| (k, v)).collect())
}
