//! Message metadata merge-and-persist engine
//!
//! Merges JSON values into per-message metadata documents at dotted key
//! paths. Writes for the same (session, message) pair are serialized by a
//! per-target lock held for the lifetime of the transaction, and the
//! top-level `system` namespace is reserved for privileged callers.
//!
//! ```no_run
//! use chatmeta::metadata::{CallContext, MetadataStore, MetadataWriteItem, Privilege};
//! use serde_json::json;
//!
//! let store = MetadataStore::open("/tmp/chatmeta/messages.db")?;
//! store.put_message_metadata(
//!     &CallContext::background(),
//!     "session-1",
//!     vec![MetadataWriteItem::new("message-uuid", "tags", json!({"topic": "billing"}))],
//!     Privilege::Unprivileged,
//! )?;
//! # Ok::<(), chatmeta::metadata::MetadataError>(())
//! ```

mod batch;
mod context;
mod error;
mod item;
pub mod lock;
pub mod path;
mod privilege;
mod store;
pub mod value;

pub use batch::{put_message_metadata, BatchOutcome, TxScope};
pub use context::CallContext;
pub use error::{MergeError, MetadataError, MetadataErrorKind};
pub use item::MetadataWriteItem;
pub use lock::{TargetKey, TargetLocks};
pub use path::{merge_at, KeyPath};
pub use privilege::{filter_items, Privilege};
pub use store::{
    MessageRecord, MessageRole, MetadataConnection, MetadataStore, MetadataTx,
    DEFAULT_BUSY_TIMEOUT, DEFAULT_LOCK_TIMEOUT,
};
pub use value::Document;

use crate::config::MemoryStoreConfig;

/// Open the store described by the `memoryStore` config section.
pub fn open_store(config: &MemoryStoreConfig) -> Result<MetadataStore, MetadataError> {
    Ok(MetadataStore::open(&config.path)?
        .with_busy_timeout(config.busy_timeout())
        .with_lock_timeout(config.lock_timeout()))
}
