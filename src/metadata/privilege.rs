//! Reserved namespace filtering
//!
//! Unprivileged callers may not write under the top-level `system` key.
//! Offending items are dropped silently; the batch still succeeds.

use tracing::debug;

use super::item::MetadataWriteItem;
use super::value::strip_reserved;

/// Whether the caller may write the reserved namespace.
///
/// Decided by the auth layer; this crate only applies the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Privilege {
    Privileged,
    #[default]
    Unprivileged,
}

impl Privilege {
    pub fn is_privileged(self) -> bool {
        matches!(self, Self::Privileged)
    }
}

impl From<bool> for Privilege {
    fn from(is_privileged: bool) -> Self {
        if is_privileged {
            Self::Privileged
        } else {
            Self::Unprivileged
        }
    }
}

/// Apply the reserved-namespace policy to a batch.
///
/// Privileged batches pass through unchanged. For unprivileged ones, items
/// addressed at `system` or `system.*` are removed, and a top-level `system`
/// key is stripped from the object value of every surviving item, root
/// merges included.
pub fn filter_items(items: Vec<MetadataWriteItem>, privilege: Privilege) -> Vec<MetadataWriteItem> {
    if privilege.is_privileged() {
        return items;
    }

    items
        .into_iter()
        .filter_map(|mut item| {
            if item.path().is_reserved() {
                debug!(
                    target: "metadata",
                    uuid = %item.target_id,
                    key = %item.key_path,
                    "dropping unprivileged write to reserved namespace"
                );
                return None;
            }
            if strip_reserved(&mut item.value) {
                debug!(
                    target: "metadata",
                    uuid = %item.target_id,
                    key = %item.key_path,
                    "stripped reserved key from unprivileged write"
                );
            }
            Some(item)
        })
        .collect()
}
