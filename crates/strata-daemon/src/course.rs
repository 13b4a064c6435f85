//! Course records read from the marketplace contract.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use strata_sync::client::value_as_u64;

/// A marketplace course. Integer fields arrive as JSON numbers or as
/// decimal strings; `price` stays a string because it can exceed `u64`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    #[serde(deserialize_with = "flexible_u64")]
    pub id: u64,
    pub author: String,
    #[serde(deserialize_with = "integer_string")]
    pub price: String,
    #[serde(rename = "metadataURI")]
    pub metadata_uri: String,
    pub is_active: bool,
    #[serde(default, deserialize_with = "flexible_u64")]
    pub student_count: u64,
    #[serde(default, deserialize_with = "flexible_u64")]
    pub created_at: u64,
}

fn flexible_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    value_as_u64(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("expected an unsigned integer, got {value}")))
}

fn integer_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) if n.is_u64() => Ok(n.to_string()),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => Ok(s),
        other => Err(serde::de::Error::custom(format!(
            "expected an integer amount, got {other}"
        ))),
    }
}
