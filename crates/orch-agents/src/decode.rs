//! Forgiving decode of tool-call parameters.
//!
//! Providers routinely hand back loosely-shaped arguments: a list encoded as a
//! JSON string, a single path where a list was expected, `null` for an empty
//! field. Every parameter is decoded through [`decode_or_default`], so a
//! malformed value reads as absent instead of failing the call.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Decode `input[field]` as `T`, falling back to `T::default()`.
///
/// Attempts, in order: the value as-is, a string value parsed as JSON, and a
/// bare scalar wrapped into a one-element list.
pub fn decode_or_default<T>(input: &Value, field: &str) -> T
where
    T: DeserializeOwned + Default,
{
    decode_field(input, field).unwrap_or_default()
}

/// Like [`decode_or_default`] but keeps absence visible to the caller.
pub fn decode_field<T>(input: &Value, field: &str) -> Option<T>
where
    T: DeserializeOwned,
{
    let raw = match input.get(field) {
        None | Some(Value::Null) => return None,
        Some(raw) => raw,
    };

    if let Ok(value) = serde_json::from_value::<T>(raw.clone()) {
        return Some(value);
    }

    if let Value::String(text) = raw {
        if let Ok(embedded) = serde_json::from_str::<Value>(text.trim()) {
            if let Ok(value) = serde_json::from_value::<T>(embedded) {
                return Some(value);
            }
        }
    }

    if !raw.is_array() && !raw.is_object() {
        if let Ok(value) = serde_json::from_value::<T>(Value::Array(vec![raw.clone()])) {
            return Some(value);
        }
    }

    debug!(field, raw = %raw, "tool parameter did not decode; treating as absent");
    None
}
