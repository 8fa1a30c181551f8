//! Batch entry point for metadata writes
//!
//! A batch is filtered, then applied item by item, in input order, inside a
//! single transaction. The transaction is either owned by the call (begun,
//! committed and rolled back here) or borrowed from the caller, in which
//! case commit and rollback are left to the caller.

use tracing::{debug, warn};

use super::context::CallContext;
use super::error::MetadataError;
use super::item::MetadataWriteItem;
use super::privilege::{filter_items, Privilege};
use super::store::{MetadataStore, MetadataTx};

/// Transaction scope for one batch call.
pub enum TxScope<'a, 'conn> {
    /// Begun by this call; committed or rolled back here.
    Owned(MetadataTx<'conn>),
    /// Supplied by the caller; never committed or rolled back here.
    Borrowed(&'a mut MetadataTx<'conn>),
}

/// Terminal state of a batch that got as far as a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Committed,
    RolledBack,
    /// Borrowed transaction; the caller decides commit or rollback.
    Delegated,
}

impl<'conn> TxScope<'_, 'conn> {
    fn tx(&mut self) -> &mut MetadataTx<'conn> {
        match self {
            Self::Owned(tx) => tx,
            Self::Borrowed(tx) => tx,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Apply `items` in order, stopping at the first failure.
    pub fn apply(
        &mut self,
        ctx: &CallContext,
        session_id: &str,
        items: Vec<MetadataWriteItem>,
    ) -> Result<(), MetadataError> {
        let tx = self.tx();
        for item in items {
            ctx.check()?;
            tx.apply_one(ctx, session_id, item)?;
        }
        ctx.check()
    }

    /// End the scope according to `result` and ownership.
    ///
    /// An owned transaction is committed on success and rolled back on
    /// failure. A rollback failure is logged and the original error returned.
    pub fn finish(
        self,
        result: Result<(), MetadataError>,
    ) -> (BatchOutcome, Result<(), MetadataError>) {
        match (self, result) {
            (Self::Borrowed(_), result) => (BatchOutcome::Delegated, result),
            (Self::Owned(tx), Ok(())) => match tx.commit() {
                Ok(()) => (BatchOutcome::Committed, Ok(())),
                // A failed COMMIT leaves nothing applied; the transaction is
                // rolled back when SQLite drops it.
                Err(err) => (BatchOutcome::RolledBack, Err(err)),
            },
            (Self::Owned(tx), Err(err)) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(
                        target: "metadata",
                        error = %rollback_err,
                        "rollback after failed metadata write also failed"
                    );
                }
                (BatchOutcome::RolledBack, Err(err))
            }
        }
    }
}

/// Store or merge metadata for messages in a session.
///
/// `tx` enrolls the batch in the caller's transaction; with `None` a new
/// transaction is opened on a fresh connection from `store` and fully
/// managed here. Unprivileged callers cannot write the `system` namespace:
/// such items are dropped without error.
///
/// # Errors
///
/// The first failing item aborts the batch. With an owned transaction
/// nothing from the batch is persisted; with a borrowed one the error is
/// returned and rollback is the caller's responsibility.
pub fn put_message_metadata(
    ctx: &CallContext,
    store: &MetadataStore,
    tx: Option<&mut MetadataTx<'_>>,
    session_id: &str,
    items: Vec<MetadataWriteItem>,
    privilege: Privilege,
) -> Result<(), MetadataError> {
    let submitted = items.len();
    let items = filter_items(items, privilege);
    if items.len() != submitted {
        debug!(
            target: "metadata",
            session_id,
            dropped = submitted - items.len(),
            "reserved-namespace writes dropped"
        );
    }

    if items.is_empty() {
        return Ok(());
    }

    match tx {
        Some(tx) => run_batch(ctx, TxScope::Borrowed(tx), session_id, items),
        None => {
            ctx.check()?;
            let mut conn = store.connect()?;
            let tx = conn.begin()?;
            run_batch(ctx, TxScope::Owned(tx), session_id, items)
        }
    }
}

fn run_batch(
    ctx: &CallContext,
    mut scope: TxScope<'_, '_>,
    session_id: &str,
    items: Vec<MetadataWriteItem>,
) -> Result<(), MetadataError> {
    let count = items.len();
    let owned = scope.is_owned();
    debug!(target: "metadata", session_id, items = count, owned, "applying metadata batch");

    let result = scope.apply(ctx, session_id, items);
    let (outcome, result) = scope.finish(result);

    match &result {
        Ok(()) => debug!(target: "metadata", session_id, items = count, ?outcome, "metadata batch done"),
        Err(err) => warn!(
            target: "metadata",
            session_id,
            items = count,
            ?outcome,
            kind = %err.kind(),
            error = %err,
            "metadata batch failed"
        ),
    }
    result
}

impl MetadataStore {
    /// [`put_message_metadata`] with a transaction owned by the call.
    pub fn put_message_metadata(
        &self,
        ctx: &CallContext,
        session_id: &str,
        items: Vec<MetadataWriteItem>,
        privilege: Privilege,
    ) -> Result<(), MetadataError> {
        put_message_metadata(ctx, self, None, session_id, items, privilege)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::store::MessageRecord;
    use crate::metadata::MetadataErrorKind;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn seeded_store(uuids: &[&str]) -> (MetadataStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = MetadataStore::open(temp_dir.path().join("messages.db")).unwrap();
        let conn = store.connect().unwrap();
        for uuid in uuids {
            conn.insert_message(&MessageRecord::user("s1", "x").with_uuid(*uuid))
                .unwrap();
        }
        (store, temp_dir)
    }

    fn metadata(store: &MetadataStore, uuid: &str) -> serde_json::Value {
        store
            .connect()
            .unwrap()
            .get_metadata("s1", uuid)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let (store, _temp) = seeded_store(&[]);
        store
            .put_message_metadata(&CallContext::background(), "s1", Vec::new(), Privilege::Unprivileged)
            .unwrap();
    }

    #[test]
    fn test_empty_batch_ignores_cancellation_on_both_paths() {
        let (store, _temp) = seeded_store(&["m1"]);
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::with_cancel(token);
        let dropped = || vec![MetadataWriteItem::new("m1", "system", json!({"x": 1}))];

        store
            .put_message_metadata(&ctx, "s1", dropped(), Privilege::Unprivileged)
            .unwrap();

        let mut conn = store.connect().unwrap();
        let mut tx = conn.begin().unwrap();
        put_message_metadata(&ctx, &store, Some(&mut tx), "s1", dropped(), Privilege::Unprivileged)
            .unwrap();
        tx.commit().unwrap();
        assert_eq!(metadata(&store, "m1"), json!({}));
    }

    #[test]
    fn test_owned_commit() {
        let (store, _temp) = seeded_store(&["m1", "m2"]);
        store
            .put_message_metadata(
                &CallContext::background(),
                "s1",
                vec![
                    MetadataWriteItem::new("m1", "tags", json!({"x": 1})),
                    MetadataWriteItem::root("m2", json!({"a": 1})),
                ],
                Privilege::Unprivileged,
            )
            .unwrap();
        assert_eq!(metadata(&store, "m1"), json!({"tags": {"x": 1}}));
        assert_eq!(metadata(&store, "m2"), json!({"a": 1}));
        assert_eq!(store.locks().held_count(), 0);
    }

    #[test]
    fn test_owned_rollback_on_failure() {
        let (store, _temp) = seeded_store(&["m1"]);
        let err = store
            .put_message_metadata(
                &CallContext::background(),
                "s1",
                vec![
                    MetadataWriteItem::root("m1", json!({"a": 1})),
                    MetadataWriteItem::root("missing", json!({"b": 1})),
                ],
                Privilege::Privileged,
            )
            .unwrap_err();
        assert_eq!(err.kind(), MetadataErrorKind::TargetNotFound);
        assert_eq!(metadata(&store, "m1"), json!({}));
        assert_eq!(store.locks().held_count(), 0);
    }

    #[test]
    fn test_borrowed_transaction_is_not_committed() {
        let (store, _temp) = seeded_store(&["m1"]);
        let mut conn = store.connect().unwrap();
        let mut tx = conn.begin().unwrap();

        put_message_metadata(
            &CallContext::background(),
            &store,
            Some(&mut tx),
            "s1",
            vec![MetadataWriteItem::root("m1", json!({"a": 1}))],
            Privilege::Unprivileged,
        )
        .unwrap();

        // Visible inside the caller's transaction, lock still held
        assert_eq!(tx.get_metadata("s1", "m1").unwrap(), Some(json!({"a": 1})));
        assert_eq!(store.locks().held_count(), 1);

        tx.rollback().unwrap();
        assert_eq!(metadata(&store, "m1"), json!({}));
        assert_eq!(store.locks().held_count(), 0);
    }

    #[test]
    fn test_borrowed_failure_leaves_rollback_to_caller() {
        let (store, _temp) = seeded_store(&["m1"]);
        let mut conn = store.connect().unwrap();
        let mut tx = conn.begin().unwrap();

        let err = put_message_metadata(
            &CallContext::background(),
            &store,
            Some(&mut tx),
            "s1",
            vec![
                MetadataWriteItem::root("m1", json!({"a": 1})),
                MetadataWriteItem::root("m1", json!("not an object")),
            ],
            Privilege::Unprivileged,
        )
        .unwrap_err();
        assert_eq!(err.kind(), MetadataErrorKind::TypeMismatch);

        // First item is still pending in the caller's transaction
        assert_eq!(tx.get_metadata("s1", "m1").unwrap(), Some(json!({"a": 1})));
        tx.commit().unwrap();
        assert_eq!(metadata(&store, "m1"), json!({"a": 1}));
    }

    #[test]
    fn test_cancelled_before_begin() {
        let (store, _temp) = seeded_store(&["m1"]);
        let token = CancellationToken::new();
        token.cancel();
        let err = store
            .put_message_metadata(
                &CallContext::with_cancel(token),
                "s1",
                vec![MetadataWriteItem::root("m1", json!({"a": 1}))],
                Privilege::Unprivileged,
            )
            .unwrap_err();
        assert_eq!(err.kind(), MetadataErrorKind::Cancelled);
        assert_eq!(metadata(&store, "m1"), json!({}));
    }

    #[test]
    fn test_unprivileged_system_write_is_dropped() {
        let (store, _temp) = seeded_store(&["m1"]);
        store
            .put_message_metadata(
                &CallContext::background(),
                "s1",
                vec![MetadataWriteItem::new("m1", "system.flag", json!({"flag": true}))],
                Privilege::Unprivileged,
            )
            .unwrap();
        assert_eq!(metadata(&store, "m1"), json!({}));
    }

    #[test]
    fn test_privileged_system_write_is_kept() {
        let (store, _temp) = seeded_store(&["m1"]);
        store
            .put_message_metadata(
                &CallContext::background(),
                "s1",
                vec![MetadataWriteItem::new("m1", "system", json!({"flag": true}))],
                Privilege::Privileged,
            )
            .unwrap();
        assert_eq!(metadata(&store, "m1"), json!({"system": {"flag": true}}));
    }
}
