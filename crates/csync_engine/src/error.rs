//! Error types for the sync engine.

use csync_core::CoreError;
use std::io;
use thiserror::Error;

/// Result type for replica operations.
pub type ReplicaResult<T> = Result<T, ReplicaError>;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors reported by a [`Replica`](crate::Replica) backend.
#[derive(Error, Debug)]
pub enum ReplicaError {
    /// The path does not exist.
    #[error("not found: {path}")]
    NotFound {
        /// Replica-relative path.
        path: String,
    },

    /// I/O failure on a path.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// Replica-relative path.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The replica root cannot be reached.
    #[error("replica {root} is unreachable: {message}")]
    Unreachable {
        /// Replica description.
        root: String,
        /// What failed.
        message: String,
    },

    /// The backend does not support the operation.
    #[error("{operation} is not supported by {replica}")]
    Unsupported {
        /// Operation name.
        operation: &'static str,
        /// Replica description.
        replica: String,
    },

    /// No credentials, or the credentials were rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A fault injected by a test backend.
    #[error("injected {kind:?} fault in {operation} on {path:?}")]
    Injected {
        /// Operation name.
        operation: &'static str,
        /// Replica-relative path.
        path: String,
        /// Simulated error kind.
        kind: io::ErrorKind,
    },
}

impl ReplicaError {
    /// Wraps an I/O error, mapping `NotFound` to [`ReplicaError::NotFound`].
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Io { path, source }
        }
    }

    /// Creates a not-found error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Returns true for [`ReplicaError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        let kind = match self {
            Self::Io { source, .. } => source.kind(),
            Self::Injected { kind, .. } => *kind,
            _ => return false,
        };
        matches!(
            kind,
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        )
    }
}

/// Errors that can occur during a sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Journal, configuration or lock error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Backend error.
    #[error("replica error: {0}")]
    Replica(#[from] ReplicaError),

    /// The run cannot proceed at all.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The run was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A lifecycle step was called out of order.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted step.
        to: String,
    },

    /// The source changed between detection and propagation.
    #[error("{path} changed during the run")]
    SourceChanged {
        /// Replica-relative path.
        path: String,
    },

    /// A copied file does not match its source checksum.
    #[error("checksum mismatch after copying {path}")]
    Verification {
        /// Replica-relative path.
        path: String,
    },
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Replica(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this error must abort the run.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Fatal(_) => true,
            SyncError::Core(CoreError::Locked { .. }) => true,
            SyncError::Replica(ReplicaError::Unreachable { .. }) => true,
            SyncError::Replica(ReplicaError::Authentication(_)) => true,
            _ => false,
        }
    }
}
