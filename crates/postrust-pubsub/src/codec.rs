//! JSON pack/unpack with failure-tolerant fallbacks.
//!
//! The database channel carries payloads this process did not necessarily
//! produce, so decoding must never panic or propagate: a malformed payload
//! degrades to a fallback value instead of taking down the listener.

use serde_json::Value;
use tracing::warn;

/// Serialize a value to a JSON string.
///
/// Returns the literal string `"null"` if the value cannot be represented,
/// logging a warning rather than returning a `Result` — callers (mostly
/// `notify()`) treat this as infallible.
pub fn pack(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| {
        warn!(error = %err, "failed to serialize pub/sub payload, sending null");
        "null".to_string()
    })
}

/// Serialize a value to a pretty-printed JSON string, with the same
/// fallback behavior as [`pack`].
pub fn pack_pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|err| {
        warn!(error = %err, "failed to serialize pub/sub payload, sending null");
        "null".to_string()
    })
}

/// Decode a JSON payload received over a notification.
///
/// Malformed JSON decodes to an empty object rather than propagating a
/// parse error, so a bad payload from some other publisher can't crash the
/// receiver.
pub fn unpack(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|err| {
        warn!(error = %err, payload = %text, "failed to decode pub/sub payload, using empty object");
        Value::Object(serde_json::Map::new())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pack_unpack_round_trip() {
        let value = json!({"a": "b", "n": 1, "list": [1, 2, 3]});
        let packed = pack(&value);
        assert_eq!(unpack(&packed), value);
    }

    #[test]
    fn test_pack_null() {
        assert_eq!(pack(&Value::Null), "null");
    }

    #[test]
    fn test_unpack_malformed_is_empty_object() {
        let decoded = unpack("{not json");
        assert_eq!(decoded, Value::Object(serde_json::Map::new()));
    }

    #[test]
    fn test_unpack_valid_scalar() {
        assert_eq!(unpack("true"), Value::Bool(true));
        assert_eq!(unpack("42"), json!(42));
    }

    #[test]
    fn test_pack_pretty_contains_newlines() {
        let value = json!({"a": 1});
        assert!(pack_pretty(&value).contains('\n'));
    }
}
