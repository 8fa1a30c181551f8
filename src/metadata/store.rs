//! SQLite-backed message metadata store
//!
//! Each message row carries its metadata document as a JSON text column,
//! keyed by `(session_id, uuid)`. Writes go through [`MetadataTx`], which
//! holds an IMMEDIATE transaction plus the target locks it acquired; both
//! are released together when the transaction ends.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, trace};
use uuid::Uuid;

use super::context::CallContext;
use super::error::MetadataError;
use super::item::MetadataWriteItem;
use super::lock::{LockError, TargetKey, TargetLockGuard, TargetLocks};
use super::path::merge_at;
use super::value::{document_from_column, Document};

/// Default SQLite busy timeout
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for a per-target lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = r#"
    PRAGMA synchronous=NORMAL;

    CREATE TABLE IF NOT EXISTS messages (
      session_id TEXT NOT NULL,
      uuid TEXT NOT NULL,
      role TEXT NOT NULL DEFAULT 'user',
      content TEXT NOT NULL DEFAULT '',
      metadata TEXT,
      created_at INTEGER NOT NULL,
      updated_at INTEGER NOT NULL,
      PRIMARY KEY (session_id, uuid)
    );
"#;

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    #[default]
    User,
    Assistant,
    System,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A message row as seeded by the session/message service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub uuid: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    /// Initial metadata document, `None` for a message without metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Unix ms
    pub created_at: i64,
}

impl MessageRecord {
    pub fn new(session_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            metadata: None,
            created_at: now_millis(),
        }
    }

    pub fn user(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(session_id, MessageRole::User, content)
    }

    pub fn assistant(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(session_id, MessageRole::Assistant, content)
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Handle to a metadata database. Cheap to share across threads; every
/// caller opens its own connection with [`MetadataStore::connect`].
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
    locks: Arc<TargetLocks>,
    busy_timeout: Duration,
    lock_timeout: Duration,
}

impl MetadataStore {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MetadataError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                MetadataError::storage(
                    format!("failed to create store directory {}", parent.display()),
                    e,
                )
            })?;
        }

        let store = Self {
            path,
            locks: TargetLocks::new(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        };
        store.migrate()?;
        info!(target: "store", path = %store.path.display(), "metadata store opened");
        Ok(store)
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock registry shared by every connection of this store
    pub fn locks(&self) -> &Arc<TargetLocks> {
        &self.locks
    }

    /// Open a new connection to the store.
    pub fn connect(&self) -> Result<MetadataConnection, MetadataError> {
        let conn = Connection::open(&self.path).map_err(|e| {
            MetadataError::storage(format!("failed to open {}", self.path.display()), e)
        })?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| MetadataError::storage("failed to set busy timeout", e))?;
        Ok(MetadataConnection {
            conn,
            locks: Arc::clone(&self.locks),
            lock_timeout: self.lock_timeout,
        })
    }

    fn migrate(&self) -> Result<(), MetadataError> {
        let conn = self.connect()?;
        let mode: String = conn
            .conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| MetadataError::storage("failed to enable WAL", e))?;
        conn.conn
            .execute_batch(SCHEMA)
            .map_err(|e| MetadataError::storage("failed to migrate metadata store", e))?;
        debug!(target: "store", journal_mode = %mode, "schema ready");
        Ok(())
    }
}

/// A single database connection.
#[derive(Debug)]
pub struct MetadataConnection {
    conn: Connection,
    locks: Arc<TargetLocks>,
    lock_timeout: Duration,
}

impl MetadataConnection {
    /// Begin an IMMEDIATE transaction on this connection.
    ///
    /// Blocks for up to the busy timeout while another connection holds the
    /// write transaction, without consulting any [`CallContext`]. Contention
    /// between two transactions therefore surfaces here as a
    /// `Transaction` error. Target lock waits, and their
    /// `LockAcquisitionFailed` errors, only occur for locks held outside a
    /// write transaction.
    pub fn begin(&mut self) -> Result<MetadataTx<'_>, MetadataError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| MetadataError::transaction("failed to begin transaction", e))?;
        Ok(MetadataTx {
            tx,
            held: Vec::new(),
            locks: Arc::clone(&self.locks),
            lock_timeout: self.lock_timeout,
        })
    }

    /// Insert a message row outside any explicit transaction.
    pub fn insert_message(&self, record: &MessageRecord) -> Result<(), MetadataError> {
        insert_message(&self.conn, record)
    }

    /// Read a message's metadata document. `None` if the row does not exist.
    pub fn get_metadata(&self, session_id: &str, uuid: &str) -> Result<Option<Value>, MetadataError> {
        Ok(load_document(&self.conn, session_id, uuid)?.map(Value::Object))
    }

    pub fn delete_message(&self, session_id: &str, uuid: &str) -> Result<bool, MetadataError> {
        delete_message(&self.conn, session_id, uuid)
    }
}

/// An open write transaction together with the target locks it holds.
#[derive(Debug)]
pub struct MetadataTx<'conn> {
    // Declared before `held`: on drop the rollback runs before the locks are
    // released.
    tx: Transaction<'conn>,
    held: Vec<TargetLockGuard>,
    locks: Arc<TargetLocks>,
    lock_timeout: Duration,
}

impl MetadataTx<'_> {
    /// Acquire the lock for `key` for the rest of this transaction.
    ///
    /// Re-acquiring a key this transaction already holds is a no-op.
    pub fn lock_target(&mut self, ctx: &CallContext, key: TargetKey) -> Result<(), MetadataError> {
        if self.holds(&key) {
            return Ok(());
        }
        let target = key.to_string();
        let guard = self
            .locks
            .acquire(key, self.lock_timeout, ctx)
            .map_err(|err| MetadataError::LockAcquisitionFailed {
                target,
                reason: match err {
                    LockError::Timeout(_) => err.to_string(),
                    LockError::Cancelled(reason) => reason,
                },
            })?;
        self.held.push(guard);
        Ok(())
    }

    pub fn holds(&self, key: &TargetKey) -> bool {
        self.held.iter().any(|guard| guard.key() == key)
    }

    pub fn held_targets(&self) -> impl Iterator<Item = &TargetKey> {
        self.held.iter().map(TargetLockGuard::key)
    }

    /// Lock, load, merge and write back one item.
    ///
    /// Nothing is written unless the merge succeeds.
    pub fn apply_one(
        &mut self,
        ctx: &CallContext,
        session_id: &str,
        item: MetadataWriteItem,
    ) -> Result<(), MetadataError> {
        self.lock_target(ctx, TargetKey::new(session_id, item.target_id.as_str()))?;
        ctx.check()?;

        let mut document = load_document(&self.tx, session_id, &item.target_id)?.ok_or_else(|| {
            MetadataError::TargetNotFound {
                session_id: session_id.to_owned(),
                target_id: item.target_id.clone(),
            }
        })?;

        let path = item.path();
        merge_at(&mut document, &path, item.value)
            .map_err(|e| MetadataError::from_merge(item.target_id.as_str(), e))?;

        store_document(&self.tx, session_id, &item.target_id, &document)?;
        trace!(
            target: "metadata",
            session_id,
            uuid = %item.target_id,
            key = %path,
            "metadata merged"
        );
        Ok(())
    }

    pub fn insert_message(&self, record: &MessageRecord) -> Result<(), MetadataError> {
        insert_message(&self.tx, record)
    }

    pub fn get_metadata(&self, session_id: &str, uuid: &str) -> Result<Option<Value>, MetadataError> {
        Ok(load_document(&self.tx, session_id, uuid)?.map(Value::Object))
    }

    pub fn delete_message(&self, session_id: &str, uuid: &str) -> Result<bool, MetadataError> {
        delete_message(&self.tx, session_id, uuid)
    }

    /// Commit, then release every held target lock.
    pub fn commit(self) -> Result<(), MetadataError> {
        let MetadataTx { tx, held, .. } = self;
        let result = tx
            .commit()
            .map_err(|e| MetadataError::transaction("failed to commit transaction", e));
        drop(held);
        result
    }

    /// Roll back, then release every held target lock.
    pub fn rollback(self) -> Result<(), MetadataError> {
        let MetadataTx { tx, held, .. } = self;
        let result = tx
            .rollback()
            .map_err(|e| MetadataError::transaction("failed to roll back transaction", e));
        drop(held);
        result
    }
}

fn load_document(
    conn: &Connection,
    session_id: &str,
    uuid: &str,
) -> Result<Option<Document>, MetadataError> {
    let raw: Option<Option<String>> = conn
        .query_row(
            "SELECT metadata FROM messages WHERE session_id = ?1 AND uuid = ?2",
            params![session_id, uuid],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| MetadataError::storage("failed to retrieve existing metadata", e))?;

    match raw {
        None => Ok(None),
        Some(column) => Ok(Some(document_from_column(column.as_deref())?)),
    }
}

fn store_document(
    conn: &Connection,
    session_id: &str,
    uuid: &str,
    document: &Document,
) -> Result<(), MetadataError> {
    let encoded = serde_json::to_string(document)?;
    let updated = conn
        .execute(
            "UPDATE messages SET metadata = ?3, updated_at = ?4 WHERE session_id = ?1 AND uuid = ?2",
            params![session_id, uuid, encoded, now_millis()],
        )
        .map_err(|e| MetadataError::storage("failed to update message metadata", e))?;

    if updated == 0 {
        return Err(MetadataError::TargetNotFound {
            session_id: session_id.to_owned(),
            target_id: uuid.to_owned(),
        });
    }
    Ok(())
}

fn insert_message(conn: &Connection, record: &MessageRecord) -> Result<(), MetadataError> {
    let metadata = record
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO messages (session_id, uuid, role, content, metadata, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            record.session_id,
            record.uuid,
            record.role.to_string(),
            record.content,
            metadata,
            record.created_at,
        ],
    )
    .map_err(|e| MetadataError::storage("failed to insert message", e))?;
    Ok(())
}

fn delete_message(conn: &Connection, session_id: &str, uuid: &str) -> Result<bool, MetadataError> {
    let deleted = conn
        .execute(
            "DELETE FROM messages WHERE session_id = ?1 AND uuid = ?2",
            params![session_id, uuid],
        )
        .map_err(|e| MetadataError::storage("failed to delete message", e))?;
    Ok(deleted > 0)
}

/// Get current time in milliseconds since Unix epoch
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
