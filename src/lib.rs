//! chatmeta library
//!
//! Metadata merge-and-persist engine for chat session messages: merges JSON
//! values into per-message metadata documents at dotted key paths, inside a
//! transaction, with per-message write serialization and a reserved
//! `system` namespace for privileged callers.

pub mod config;
pub mod logging;
pub mod metadata;
