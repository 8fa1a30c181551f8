//! Cancellation and deadline for a single call

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::error::MetadataError;

/// Carried through every blocking step of a metadata write.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `timeout` from now. A timeout too large to represent leaves
    /// the deadline unset.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` if there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail if the call was cancelled or its deadline passed.
    pub fn check(&self) -> Result<(), MetadataError> {
        if self.cancel.is_cancelled() {
            return Err(MetadataError::Cancelled("context cancelled".into()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(MetadataError::Cancelled("deadline exceeded".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataErrorKind;

    #[test]
    fn test_background_never_fails() {
        let ctx = CallContext::background();
        assert!(ctx.check().is_ok());
        assert!(ctx.remaining().is_none());
    }

    #[test]
    fn test_cancelled() {
        let token = CancellationToken::new();
        let ctx = CallContext::with_cancel(token.clone());
        assert!(ctx.check().is_ok());
        token.cancel();
        assert_eq!(ctx.check().unwrap_err().kind(), MetadataErrorKind::Cancelled);
    }

    #[test]
    fn test_deadline_exceeded() {
        let ctx = CallContext::background().with_deadline(Instant::now());
        assert_eq!(ctx.check().unwrap_err().kind(), MetadataErrorKind::Cancelled);
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));

        let ctx = CallContext::background().with_timeout(Duration::from_secs(60));
        assert!(ctx.check().is_ok());
    }

    #[test]
    fn test_unbounded_timeout_has_no_deadline() {
        let ctx = CallContext::background().with_timeout(Duration::MAX);
        assert!(ctx.deadline().is_none());
        assert!(ctx.check().is_ok());
    }
}
