//! Error types for csync core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in csync core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Journal log storage error.
    #[error("storage error: {0}")]
    Storage(#[from] csync_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A journal record could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// The journal log is damaged.
    #[error("journal corruption at offset {offset}: {message}")]
    JournalCorruption {
        /// Byte offset of the damaged frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A path is not a valid replica-relative path.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Another sync run holds the configuration directory.
    #[error("locked: another csync run holds {}", path.display())]
    Locked {
        /// Path of the lock file.
        path: PathBuf,
    },

    /// `csync.conf` could not be read or parsed.
    #[error("configuration error in {}: {message}", path.display())]
    Config {
        /// Path of the configuration file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// An exclude pattern is not a valid glob.
    #[error("invalid exclude pattern {pattern:?}: {message}")]
    Exclude {
        /// The rejected pattern.
        pattern: String,
        /// Glob parser message.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid path error.
    pub fn invalid_path(path: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason,
        }
    }

    /// Returns true if the error means the journal content is unusable but
    /// the journal itself can be rebuilt.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::JournalCorruption { .. } | Self::Codec { .. })
    }
}
