//! Per-target mutation locks.
//!
//! Serializes writers of the same (session, message) document. A
//! [`TargetLockGuard`] is owned by the transaction that acquired it and the
//! lock is released when the guard is dropped, which happens when the
//! transaction commits, rolls back, or is dropped on an error path.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::context::CallContext;

/// Upper bound on a single condvar wait, so cancellation is noticed promptly.
const WAIT_SLICE: Duration = Duration::from_millis(25);

/// Identity of a lockable document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    session_id: String,
    message_id: String,
}

impl TargetKey {
    pub fn new(session_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: message_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session_id, self.message_id)
    }
}

/// Why a lock could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Cancelled(String),
}

/// Registry of currently held target locks.
///
/// One registry is shared by every connection opened from the same store.
#[derive(Debug, Default)]
pub struct TargetLocks {
    held: Mutex<HashSet<TargetKey>>,
    released: Condvar,
}

impl TargetLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire the lock for `key`, blocking until it is free.
    ///
    /// Gives up after `timeout`, or earlier if `ctx` is cancelled or reaches
    /// its deadline.
    pub fn acquire(
        self: &Arc<Self>,
        key: TargetKey,
        timeout: Duration,
        ctx: &CallContext,
    ) -> Result<TargetLockGuard, LockError> {
        let started = Instant::now();
        // An unrepresentable limit means wait without one.
        let limit = match (started.checked_add(timeout), ctx.deadline()) {
            (Some(limit), Some(deadline)) => Some(limit.min(deadline)),
            (limit, deadline) => limit.or(deadline),
        };

        let mut held = self.held.lock();
        let mut waited = false;
        while held.contains(&key) {
            if ctx.cancel_token().is_cancelled() {
                return Err(LockError::Cancelled("context cancelled".into()));
            }
            let now = Instant::now();
            if limit.is_some_and(|limit| now >= limit) {
                if ctx.deadline().is_some_and(|d| d <= now) {
                    return Err(LockError::Cancelled("deadline exceeded".into()));
                }
                return Err(LockError::Timeout(timeout));
            }
            if !waited {
                debug!(target: "metadata", target_key = %key, "waiting for target lock");
                waited = true;
            }
            let slice = limit.map_or(WAIT_SLICE, |limit| (limit - now).min(WAIT_SLICE));
            self.released.wait_for(&mut held, slice);
        }
        held.insert(key.clone());
        drop(held);

        trace!(
            target: "metadata",
            target_key = %key,
            waited_ms = started.elapsed().as_millis() as u64,
            "target lock acquired"
        );

        Ok(TargetLockGuard {
            registry: Arc::clone(self),
            key,
        })
    }

    /// Try to acquire without waiting. `None` if another holder has it.
    pub fn try_acquire(self: &Arc<Self>, key: TargetKey) -> Option<TargetLockGuard> {
        let mut held = self.held.lock();
        if !held.insert(key.clone()) {
            return None;
        }
        Some(TargetLockGuard {
            registry: Arc::clone(self),
            key,
        })
    }

    pub fn is_held(&self, key: &TargetKey) -> bool {
        self.held.lock().contains(key)
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    fn release(&self, key: &TargetKey) {
        let removed = self.held.lock().remove(key);
        if removed {
            self.released.notify_all();
        }
    }
}

/// RAII handle for a held target lock. Dropping it releases the lock.
#[must_use = "the target lock is released as soon as the guard is dropped"]
pub struct TargetLockGuard {
    registry: Arc<TargetLocks>,
    key: TargetKey,
}

impl TargetLockGuard {
    pub fn key(&self) -> &TargetKey {
        &self.key
    }
}

impl fmt::Debug for TargetLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetLockGuard")
            .field("key", &self.key)
            .finish()
    }
}

impl Drop for TargetLockGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}
