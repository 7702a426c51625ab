//! Outbound command contracts.
//!
//! Every command is a JSON object carrying an `action` and the target
//! `service` (always `"event"`):
//!
//! ```json
//! {"service":"event","action":"subscribe","eventNames":["PlayerLogin"],"worlds":["all"]}
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::convert;

/// Service a command is addressed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    /// The event service.
    #[default]
    Event,
}

/// A command sent to the event service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    /// Add to the current subscription.
    Subscribe(Subscribe),
    /// Remove from the current subscription.
    ClearSubscribe(ClearSubscribe),
    /// Ask the service to send `payload` back.
    Echo(Echo),
    /// Request the ids of recently seen characters.
    RecentCharacterIds {
        /// Target service.
        #[serde(default)]
        service: Service,
    },
    /// Request the number of recently seen characters.
    RecentCharacterIdsCount {
        /// Target service.
        #[serde(default)]
        service: Service,
    },
}

impl Command {
    /// Wire name of the action.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::ClearSubscribe(_) => "clearSubscribe",
            Self::Echo(_) => "echo",
            Self::RecentCharacterIds { .. } => "recentCharacterIds",
            Self::RecentCharacterIdsCount { .. } => "recentCharacterIdsCount",
        }
    }

    /// Create a `recentCharacterIds` command.
    pub fn recent_character_ids() -> Self {
        Self::RecentCharacterIds {
            service: Service::Event,
        }
    }

    /// Create a `recentCharacterIdsCount` command.
    pub fn recent_character_ids_count() -> Self {
        Self::RecentCharacterIdsCount {
            service: Service::Event,
        }
    }
}

impl From<Subscribe> for Command {
    fn from(command: Subscribe) -> Self {
        Self::Subscribe(command)
    }
}

impl From<ClearSubscribe> for Command {
    fn from(command: ClearSubscribe) -> Self {
        Self::ClearSubscribe(command)
    }
}

impl From<Echo> for Command {
    fn from(command: Echo) -> Self {
        Self::Echo(command)
    }
}

/// Subscribe to events.
///
/// Character ids, event names and worlds may each contain `"all"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscribe {
    /// Target service.
    #[serde(default)]
    pub service: Service,
    /// Character ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub characters: Vec<String>,
    /// Event names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_names: Vec<String>,
    /// World ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub worlds: Vec<String>,
    /// Require both the character and the world filter to match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_and_characters_with_worlds: Option<bool>,
}

impl Subscribe {
    /// Create an empty subscription.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add character ids.
    pub fn characters<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.characters.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Add event names.
    pub fn event_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_names.extend(names.into_iter().map(Into::into));
        self
    }

    /// Add world ids.
    pub fn worlds<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.worlds.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Set the character/world conjunction flag.
    pub fn logical_and_characters_with_worlds(mut self, enabled: bool) -> Self {
        self.logical_and_characters_with_worlds = Some(enabled);
        self
    }
}

/// Remove subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearSubscribe {
    /// Target service.
    #[serde(default)]
    pub service: Service,
    /// Clear everything.
    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        serialize_with = "convert::bool_as_str",
        deserialize_with = "convert::bool_from_str"
    )]
    pub all: bool,
    /// Character ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub characters: Vec<String>,
    /// Event names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_names: Vec<String>,
    /// World ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub worlds: Vec<String>,
}

impl ClearSubscribe {
    /// Clear every subscription.
    pub fn all() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    /// Create an empty clear command.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove character ids.
    pub fn characters<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.characters.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Remove event names.
    pub fn event_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_names.extend(names.into_iter().map(Into::into));
        self
    }

    /// Remove world ids.
    pub fn worlds<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.worlds.extend(ids.into_iter().map(Into::into));
        self
    }
}

/// Echo a payload back through the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Echo {
    /// Target service.
    #[serde(default)]
    pub service: Service,
    /// Payload the service sends back.
    pub payload: serde_json::Value,
}

impl Echo {
    /// Create an echo command.
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            service: Service::Event,
            payload,
        }
    }
}

/// Subscriptions acknowledged so far, replayed after a reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    characters: BTreeSet<String>,
    event_names: BTreeSet<String>,
    worlds: BTreeSet<String>,
    logical_and: Option<bool>,
}

impl SubscriptionSet {
    /// Whether nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.characters.is_empty() && self.event_names.is_empty() && self.worlds.is_empty()
    }

    /// Record a subscribe command.
    pub fn apply_subscribe(&mut self, command: &Subscribe) {
        self.characters.extend(command.characters.iter().cloned());
        self.event_names.extend(command.event_names.iter().cloned());
        self.worlds.extend(command.worlds.iter().cloned());
        if command.logical_and_characters_with_worlds.is_some() {
            self.logical_and = command.logical_and_characters_with_worlds;
        }
    }

    /// Record a clear command.
    pub fn apply_clear(&mut self, command: &ClearSubscribe) {
        if command.all {
            *self = Self::default();
            return;
        }
        for id in &command.characters {
            self.characters.remove(id);
        }
        for name in &command.event_names {
            self.event_names.remove(name);
        }
        for id in &command.worlds {
            self.worlds.remove(id);
        }
    }

    /// A single subscribe command restoring this set, if it is not empty.
    pub fn to_subscribe(&self) -> Option<Subscribe> {
        if self.is_empty() {
            return None;
        }
        Some(Subscribe {
            service: Service::Event,
            characters: self.characters.iter().cloned().collect(),
            event_names: self.event_names.iter().cloned().collect(),
            worlds: self.worlds.iter().cloned().collect(),
            logical_and_characters_with_worlds: self.logical_and,
        })
    }
}
