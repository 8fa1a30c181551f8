//! Write items accepted by the batch entry point

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::path::KeyPath;

/// One metadata write: merge `value` at `key` inside message `uuid`'s document.
///
/// Field names follow the wire shape collaborators already send
/// (`{"uuid": ..., "key": "a.b", "metadata": {...}}`). An absent key means
/// the document root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataWriteItem {
    /// Identifier of the message whose metadata is updated
    #[serde(rename = "uuid")]
    pub target_id: String,
    /// Dotted key path, empty for the root
    #[serde(rename = "key", default)]
    pub key_path: String,
    /// Value merged at the key path
    #[serde(rename = "metadata")]
    pub value: Value,
}

impl MetadataWriteItem {
    pub fn new(target_id: impl Into<String>, key_path: impl Into<String>, value: Value) -> Self {
        Self {
            target_id: target_id.into(),
            key_path: key_path.into(),
            value,
        }
    }

    /// Write at the document root.
    pub fn root(target_id: impl Into<String>, value: Value) -> Self {
        Self::new(target_id, "", value)
    }

    pub fn path(&self) -> KeyPath {
        KeyPath::parse(&self.key_path)
    }
}
