//! Error types for metadata writes

use std::fmt;

/// Boxed source error carried by storage and transaction failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a merge against an in-memory document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    /// A root merge was attempted with a value that is not an object.
    #[error("root merge requires an object value, found {found}")]
    TypeMismatch { found: &'static str },

    /// An intermediate segment holds a value that cannot be descended into.
    #[error("cannot descend into `{segment}` of `{path}`: existing value is a {found}")]
    PathConflict {
        path: String,
        segment: String,
        found: &'static str,
    },
}

/// Externally distinguishable failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataErrorKind {
    Transaction,
    LockAcquisitionFailed,
    TargetNotFound,
    TypeMismatch,
    PathConflict,
    Storage,
    Serialization,
    Cancelled,
}

impl fmt::Display for MetadataErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transaction => write!(f, "transaction"),
            Self::LockAcquisitionFailed => write!(f, "lock_acquisition_failed"),
            Self::TargetNotFound => write!(f, "target_not_found"),
            Self::TypeMismatch => write!(f, "type_mismatch"),
            Self::PathConflict => write!(f, "path_conflict"),
            Self::Storage => write!(f, "storage"),
            Self::Serialization => write!(f, "serialization"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Errors returned by metadata write operations
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// Begin, commit or rollback failed.
    #[error("{message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The per-target lock could not be obtained.
    #[error("failed to acquire lock for {target}: {reason}")]
    LockAcquisitionFailed { target: String, reason: String },

    /// No message row exists for the target.
    #[error(
        "failed to retrieve existing metadata for message {target_id} in session {session_id}. \
         was the message or session deleted?"
    )]
    TargetNotFound {
        session_id: String,
        target_id: String,
    },

    /// Root merge with a non-object value.
    #[error("failed to store metadata for message {target_id}: {source}")]
    TypeMismatch {
        target_id: String,
        #[source]
        source: MergeError,
    },

    /// Intermediate path segment is not an object.
    #[error("failed to store metadata for message {target_id}: {source}")]
    PathConflict {
        target_id: String,
        #[source]
        source: MergeError,
    },

    /// Reading or writing the metadata row failed.
    #[error("{message}")]
    Storage {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The stored document could not be decoded or the merged one encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The call was cancelled or ran past its deadline.
    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl MetadataError {
    pub fn transaction(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transaction {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn storage(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap a merge failure for the given target.
    pub fn from_merge(target_id: impl Into<String>, source: MergeError) -> Self {
        let target_id = target_id.into();
        match source {
            MergeError::TypeMismatch { .. } => Self::TypeMismatch { target_id, source },
            MergeError::PathConflict { .. } => Self::PathConflict { target_id, source },
        }
    }

    pub fn kind(&self) -> MetadataErrorKind {
        match self {
            Self::Transaction { .. } => MetadataErrorKind::Transaction,
            Self::LockAcquisitionFailed { .. } => MetadataErrorKind::LockAcquisitionFailed,
            Self::TargetNotFound { .. } => MetadataErrorKind::TargetNotFound,
            Self::TypeMismatch { .. } => MetadataErrorKind::TypeMismatch,
            Self::PathConflict { .. } => MetadataErrorKind::PathConflict,
            Self::Storage { .. } => MetadataErrorKind::Storage,
            Self::Serialization(_) => MetadataErrorKind::Serialization,
            Self::Cancelled(_) => MetadataErrorKind::Cancelled,
        }
    }
}

impl From<serde_json::Error> for MetadataError {
    fn from(err: serde_json::Error) -> Self {
        MetadataError::Serialization(err.to_string())
    }
}
