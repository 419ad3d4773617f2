//! Serde helpers for target addresses.
//!
//! Addresses in config files may be written either as JSON numbers or as
//! `"0x..."` strings. They are always serialized back as hex strings.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Num(u64),
    Text(String),
}

/// Parse `0x`-prefixed hex or plain decimal.
pub fn parse_u32(text: &str) -> Option<u32> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

pub fn serialize<S: Serializer>(value: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("0x{:08x}", value))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    match Repr::deserialize(deserializer)? {
        Repr::Num(n) => u32::try_from(n).map_err(|_| de::Error::custom("address exceeds 32 bits")),
        Repr::Text(s) => {
            parse_u32(&s).ok_or_else(|| de::Error::custom(format!("invalid address: {s}")))
        }
    }
}

/// Same as the module functions, for `Option<u32>` fields.
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => super::serialize(v, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
        match Option::<Repr>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Repr::Num(n)) => u32::try_from(n)
                .map(Some)
                .map_err(|_| de::Error::custom("value exceeds 32 bits")),
            Some(Repr::Text(s)) => parse_u32(&s)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid value: {s}"))),
        }
    }
}
