//! Dotted key paths and merge-at-path
//!
//! A key path addresses a location inside a metadata document. The empty
//! path addresses the document root.
//!
//! Merge rules:
//! - root: the value must be an object and is shallow-merged into the top level
//! - intermediate segments: absent or `null` entries become `{}`, objects are
//!   descended into, anything else is a conflict
//! - terminal segment: object into object is a shallow merge, everything else
//!   replaces the existing entry

use std::fmt;

use serde_json::{Map, Value};

use super::error::MergeError;
use super::value::{kind_name, shallow_merge, Document, RESERVED_KEY};

/// A parsed dotted key path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    raw: String,
    segments: Vec<String>,
}

impl KeyPath {
    /// Parse a dotted path. `""` is the root path.
    pub fn parse(raw: &str) -> Self {
        let segments = if raw.is_empty() {
            Vec::new()
        } else {
            raw.split('.').map(str::to_owned).collect()
        };
        Self {
            raw: raw.to_owned(),
            segments,
        }
    }

    pub fn root() -> Self {
        Self::parse("")
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether the path falls inside the reserved `system` namespace.
    pub fn is_reserved(&self) -> bool {
        self.segments.first().map(String::as_str) == Some(RESERVED_KEY)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.raw)
        }
    }
}

impl From<&str> for KeyPath {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

/// Merge `value` into `document` at `path`.
///
/// The walk is checked before anything is created, so a failed merge leaves
/// `document` untouched.
pub fn merge_at(document: &mut Document, path: &KeyPath, value: Value) -> Result<(), MergeError> {
    let Some((terminal, parents)) = path.segments().split_last() else {
        return match value {
            Value::Object(incoming) => {
                shallow_merge(document, incoming);
                Ok(())
            }
            other => Err(MergeError::TypeMismatch {
                found: kind_name(&other),
            }),
        };
    };

    check_walk(document, path, parents)?;

    let mut node = document;
    for segment in parents {
        let slot = node
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if slot.is_null() {
            *slot = Value::Object(Map::new());
        }
        node = match slot {
            Value::Object(child) => child,
            // check_walk rejected every other variant
            _ => unreachable!("non-object intermediate segment after check_walk"),
        };
    }

    let value = match (node.get_mut(terminal), value) {
        (Some(Value::Object(existing)), Value::Object(incoming)) => {
            shallow_merge(existing, incoming);
            return Ok(());
        }
        (_, value) => value,
    };
    node.insert(terminal.clone(), value);

    Ok(())
}

/// Verify every intermediate segment is absent, null or an object.
fn check_walk(document: &Document, path: &KeyPath, parents: &[String]) -> Result<(), MergeError> {
    let mut node = Some(document);
    for segment in parents {
        let Some(current) = node else {
            // Everything below a missing segment will be created fresh.
            return Ok(());
        };
        node = match current.get(segment) {
            None | Some(Value::Null) => None,
            Some(Value::Object(child)) => Some(child),
            Some(other) => {
                return Err(MergeError::PathConflict {
                    path: path.as_str().to_owned(),
                    segment: segment.clone(),
                    found: kind_name(other),
                });
            }
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn merged(start: Value, path: &str, value: Value) -> Result<Value, MergeError> {
        let mut document = doc(start);
        merge_at(&mut document, &KeyPath::parse(path), value)?;
        Ok(Value::Object(document))
    }

    #[test]
    fn test_parse_root() {
        assert!(KeyPath::parse("").is_root());
        assert!(KeyPath::root().is_root());
        assert_eq!(KeyPath::root().to_string(), "<root>");
    }

    #[test]
    fn test_parse_segments() {
        let path = KeyPath::parse("profile.name");
        assert_eq!(path.segments(), ["profile", "name"]);
        assert_eq!(path.as_str(), "profile.name");

        let odd = KeyPath::parse("a..b");
        assert_eq!(odd.segments(), ["a", "", "b"]);
    }

    #[test]
    fn test_reserved_paths() {
        assert!(KeyPath::parse("system").is_reserved());
        assert!(KeyPath::parse("system.flag").is_reserved());
        assert!(!KeyPath::parse("systems").is_reserved());
        assert!(!KeyPath::parse("user.system").is_reserved());
        assert!(!KeyPath::root().is_reserved());
    }

    #[test]
    fn test_merge_into_empty_nests_value_under_terminal() {
        let result = merged(json!({}), "profile.name", json!({"name": "Alice"})).unwrap();
        assert_eq!(result, json!({"profile": {"name": {"name": "Alice"}}}));
    }

    #[test]
    fn test_merge_single_segment_into_empty() {
        let result = merged(json!({}), "profile", json!({"name": "Alice"})).unwrap();
        assert_eq!(result, json!({"profile": {"name": "Alice"}}));
    }

    #[test]
    fn test_root_merge() {
        let result = merged(json!({"a": 0, "b": 2}), "", json!({"a": 1})).unwrap();
        assert_eq!(result, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_root_merge_rejects_non_object() {
        for value in [json!("text"), json!([1, 2]), json!(null), json!(3)] {
            let err = merged(json!({"a": 0}), "", value).unwrap_err();
            assert!(matches!(err, MergeError::TypeMismatch { .. }));
        }
    }

    #[test]
    fn test_terminal_shallow_merge() {
        let result = merged(json!({"tags": {"x": 1}}), "tags", json!({"y": 2})).unwrap();
        assert_eq!(result, json!({"tags": {"x": 1, "y": 2}}));
    }

    #[test]
    fn test_terminal_shallow_merge_is_not_recursive() {
        let start = json!({"tags": {"inner": {"a": 1}}});
        let result = merged(start, "tags", json!({"inner": {"b": 2}})).unwrap();
        assert_eq!(result, json!({"tags": {"inner": {"b": 2}}}));
    }

    #[test]
    fn test_terminal_overwrites_scalar() {
        let result = merged(json!({"tags": "plain"}), "tags", json!({"y": 2})).unwrap();
        assert_eq!(result, json!({"tags": {"y": 2}}));
    }

    #[test]
    fn test_terminal_replaces_object_with_scalar() {
        let result = merged(json!({"tags": {"x": 1}}), "tags", json!(["a"])).unwrap();
        assert_eq!(result, json!({"tags": ["a"]}));
    }

    #[test]
    fn test_terminal_replaces_array() {
        let result = merged(json!({"list": [1, 2]}), "list", json!({"x": 1})).unwrap();
        assert_eq!(result, json!({"list": {"x": 1}}));
    }

    #[test]
    fn test_null_intermediate_becomes_object() {
        let result = merged(json!({"a": null}), "a.b", json!(1)).unwrap();
        assert_eq!(result, json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_existing_intermediate_preserved() {
        let start = json!({"a": {"keep": true, "b": {"c": 1}}});
        let result = merged(start, "a.b.d", json!(2)).unwrap();
        assert_eq!(result, json!({"a": {"keep": true, "b": {"c": 1, "d": 2}}}));
    }

    #[test]
    fn test_path_conflict_on_scalar_intermediate() {
        let err = merged(json!({"a": "scalar"}), "a.b", json!(1)).unwrap_err();
        assert_eq!(
            err,
            MergeError::PathConflict {
                path: "a.b".into(),
                segment: "a".into(),
                found: "string",
            }
        );
    }

    #[test]
    fn test_path_conflict_leaves_document_untouched() {
        // "a" exists as an object, "b" is a number: nothing may be created
        // under "a" before the conflict is found.
        let mut document = doc(json!({"a": {"b": 5}}));
        let err = merge_at(&mut document, &KeyPath::parse("a.b.c.d"), json!(1)).unwrap_err();
        assert!(matches!(err, MergeError::PathConflict { ref segment, .. } if segment == "b"));
        assert_eq!(Value::Object(document), json!({"a": {"b": 5}}));

        let mut document = doc(json!({"n": null, "s": "x"}));
        let err = merge_at(&mut document, &KeyPath::parse("n.s"), json!(1));
        assert!(err.is_ok());
        assert_eq!(Value::Object(document), json!({"n": {"s": 1}, "s": "x"}));
    }

    #[test]
    fn test_idempotent_at_stable_path() {
        let once = merged(json!({"a": 1}), "tags", json!({"x": 1, "y": [1]})).unwrap();
        let twice = {
            let mut document = doc(json!({"a": 1}));
            let path = KeyPath::parse("tags");
            merge_at(&mut document, &path, json!({"x": 1, "y": [1]})).unwrap();
            merge_at(&mut document, &path, json!({"x": 1, "y": [1]})).unwrap();
            Value::Object(document)
        };
        assert_eq!(once, twice);
    }
}
