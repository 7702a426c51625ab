//! Wire fixtures.
//!
//! Builders for every envelope the push service sends, plus a small event
//! contract used across the integration tests.

use census_stream::convert;
use serde::Deserialize;
use serde_json::{json, Value};

/// `connectionStateChanged` control message.
pub fn connection_state_changed(connected: bool) -> String {
    json!({
        "connected": connected.to_string(),
        "service": "push",
        "type": "connectionStateChanged",
    })
    .to_string()
}

/// `heartbeat` control message.
pub fn heartbeat(online: &[(&str, bool)]) -> String {
    let online: serde_json::Map<String, Value> = online
        .iter()
        .map(|(endpoint, up)| ((*endpoint).to_owned(), Value::String(up.to_string())))
        .collect();
    json!({
        "online": online,
        "service": "event",
        "type": "heartbeat",
    })
    .to_string()
}

/// `serviceStateChanged` control message.
pub fn service_state_changed(detail: &str, online: bool) -> String {
    json!({
        "detail": detail,
        "online": online.to_string(),
        "service": "event",
        "type": "serviceStateChanged",
    })
    .to_string()
}

/// Subscription acknowledgement.
pub fn subscription_ack(event_names: &[&str], worlds: &[&str]) -> String {
    json!({
        "subscription": {
            "characterCount": 0,
            "eventNames": event_names,
            "logicalAndCharactersWithWorlds": false,
            "worlds": worlds,
        }
    })
    .to_string()
}

/// `serviceMessage` wrapping `payload`, with `event_name` set.
pub fn service_message(event_name: &str, mut payload: Value) -> String {
    if let Some(object) = payload.as_object_mut() {
        object.insert("event_name".to_owned(), Value::String(event_name.to_owned()));
    }
    json!({
        "payload": payload,
        "service": "event",
        "type": "serviceMessage",
    })
    .to_string()
}

/// A `PlayerLogin` service message with numeric fields encoded as strings.
pub fn player_login(character_id: u64, world_id: u32, timestamp: u64) -> String {
    service_message(
        "PlayerLogin",
        json!({
            "character_id": character_id.to_string(),
            "timestamp": timestamp.to_string(),
            "world_id": world_id.to_string(),
        }),
    )
}

/// The banner the service sends right after connecting.
pub fn help_banner() -> String {
    json!({
        "send this for help": {
            "service": "event",
            "action": "help",
        }
    })
    .to_string()
}

/// `PlayerLogin` event contract.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerLogin {
    /// Always `PlayerLogin`.
    pub event_name: String,
    /// Character that logged in.
    #[serde(deserialize_with = "convert::number_from_str")]
    pub character_id: u64,
    /// World the character logged in to.
    #[serde(deserialize_with = "convert::number_from_str")]
    pub world_id: u32,
    /// Unix timestamp.
    #[serde(deserialize_with = "convert::number_from_str")]
    pub timestamp: u64,
}

/// `PlayerLogout` event contract.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerLogout {
    /// Always `PlayerLogout`.
    pub event_name: String,
    /// Character that logged out.
    #[serde(deserialize_with = "convert::number_from_str")]
    pub character_id: u64,
}

#[cfg(test)]
mod tests {
    use census_stream::{ConnectionStateChanged, Heartbeat, ServiceMessage, SubscriptionAck};

    use super::*;

    #[test]
    fn test_control_fixtures_decode() {
        let state: ConnectionStateChanged =
            serde_json::from_str(&connection_state_changed(true)).unwrap();
        assert!(state.connected);

        let beat: Heartbeat =
            serde_json::from_str(&heartbeat(&[("EventServerEndpoint_Connery_1", true)])).unwrap();
        assert_eq!(beat.is_online("EventServerEndpoint_Connery_1"), Some(true));

        let ack: SubscriptionAck =
            serde_json::from_str(&subscription_ack(&["PlayerLogin"], &["all"])).unwrap();
        assert_eq!(ack.subscription.event_names, vec!["PlayerLogin"]);
    }

    #[test]
    fn test_player_login_decodes_string_numbers() {
        let message: ServiceMessage<PlayerLogin> =
            serde_json::from_str(&player_login(123, 17, 1_700_000_000)).unwrap();
        assert_eq!(message.message_type, "serviceMessage");
        assert_eq!(message.payload.event_name, "PlayerLogin");
        assert_eq!(message.payload.character_id, 123);
        assert_eq!(message.payload.world_id, 17);
    }
}
