//! Canonical JSON serialization.
//!
//! Compact JSON with object keys sorted at every nesting level, so the same
//! logical content always hashes to the same key. Arrays keep their order.

use serde_json::Value;

/// Canonical JSON string for `value`.
///
/// ```
/// use serde_json::json;
/// use folio_core::log::canonical::canonicalize_json;
///
/// let val = json!({"z": 1, "a": {"c": 3, "b": 2}});
/// assert_eq!(canonicalize_json(&val), r#"{"a":{"b":2,"c":3},"z":1}"#);
/// ```
#[must_use]
pub fn canonicalize_json(value: &Value) -> String {
    let mut buf = String::new();
    write_canonical(value, &mut buf);
    buf
}

fn write_canonical(value: &Value, buf: &mut String) {
    match value {
        // Scalars already print compactly.
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            buf.push_str(&value.to_string());
        }
        Value::Array(items) => {
            buf.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                write_canonical(item, buf);
            }
            buf.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            buf.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                buf.push_str(&Value::String(key.clone()).to_string());
                buf.push(':');
                write_canonical(item, buf);
            }
            buf.push('}');
        }
    }
}
