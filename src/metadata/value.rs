//! Value tree helpers
//!
//! Metadata documents are plain `serde_json::Value` trees. The helpers here
//! hold the merge primitives shared by the path resolver and the privilege
//! filter.

use serde_json::{Map, Value};

/// Top-level key reserved for privileged callers.
pub const RESERVED_KEY: &str = "system";

/// A metadata document at rest. Always an object at the top level.
pub type Document = Map<String, Value>;

/// Assign every key of `incoming` into `target`, overwriting on collision.
///
/// One level only: nested objects under a colliding key are replaced, not
/// merged.
pub fn shallow_merge(target: &mut Document, incoming: Document) {
    for (key, value) in incoming {
        target.insert(key, value);
    }
}

/// Remove a top-level `system` key from an object value.
///
/// Returns `true` if a key was removed. Non-object values are left alone.
pub fn strip_reserved(value: &mut Value) -> bool {
    match value {
        Value::Object(map) => map.remove(RESERVED_KEY).is_some(),
        _ => false,
    }
}

/// Turn a stored metadata column into a document.
///
/// A missing column, an empty string and a JSON `null` all load as an empty
/// document. Any other non-object is reported as an error.
pub fn document_from_column(raw: Option<&str>) -> Result<Document, serde_json::Error> {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return Ok(Document::new());
    };

    match serde_json::from_str::<Value>(raw)? {
        Value::Null => Ok(Document::new()),
        Value::Object(map) => Ok(map),
        other => Err(serde::de::Error::custom(format!(
            "metadata column must hold a JSON object, found {}",
            kind_name(&other)
        ))),
    }
}

/// Short name of a value's variant, used in error messages.
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
