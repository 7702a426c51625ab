//! Serde helpers for Census string encodings.
//!
//! The service sends most scalars as strings: booleans as `"true"` /
//! `"false"` (sometimes `"1"` / `"0"`) and numeric ids as `"123"`. These
//! helpers accept both the string and the native JSON form so event
//! contracts can use plain Rust types:
//!
//! ```
//! use census_stream::convert;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct PlayerLogin {
//!     #[serde(deserialize_with = "convert::number_from_str")]
//!     character_id: u64,
//! }
//!
//! let login: PlayerLogin = serde_json::from_str(r#"{"character_id":"123"}"#).unwrap();
//! assert_eq!(login.character_id, 123);
//! ```

use std::fmt::Display;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolRepr {
    Bool(bool),
    Int(u8),
    Str(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberRepr<T> {
    Number(T),
    Str(String),
}

fn parse_bool<E: de::Error>(value: &str) -> Result<bool, E> {
    match value.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(E::invalid_value(
            de::Unexpected::Str(other),
            &"\"true\", \"false\", \"1\" or \"0\"",
        )),
    }
}

/// Deserialize a boolean sent as `"true"`/`"false"`/`"1"`/`"0"` or as a JSON bool.
pub fn bool_from_str<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match BoolRepr::deserialize(deserializer)? {
        BoolRepr::Bool(value) => Ok(value),
        BoolRepr::Int(0) => Ok(false),
        BoolRepr::Int(1) => Ok(true),
        BoolRepr::Int(other) => Err(de::Error::invalid_value(
            de::Unexpected::Unsigned(u64::from(other)),
            &"0 or 1",
        )),
        BoolRepr::Str(value) => parse_bool(&value),
    }
}

/// Deserialize a number sent either as a JSON number or as a numeric string.
pub fn number_from_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    match NumberRepr::<T>::deserialize(deserializer)? {
        NumberRepr::Number(value) => Ok(value),
        NumberRepr::Str(value) => value.trim().parse().map_err(de::Error::custom),
    }
}

/// Like [`number_from_str`], mapping `null` and `""` to `None`.
pub fn option_number_from_str<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    match Option::<NumberRepr<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberRepr::Number(value)) => Ok(Some(value)),
        Some(NumberRepr::Str(value)) if value.trim().is_empty() => Ok(None),
        Some(NumberRepr::Str(value)) => value.trim().parse().map(Some).map_err(de::Error::custom),
    }
}

/// Serialize a boolean the way the service expects it in commands.
#[allow(clippy::trivially_copy_pass_by_ref)]
pub fn bool_as_str<S>(value: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(if *value { "true" } else { "false" })
}
