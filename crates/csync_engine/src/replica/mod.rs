//! Replica backends.
//!
//! A [`Replica`] is one side of a sync: something that can list a tree and
//! move bytes in and out of it. The engine only talks to replicas through
//! this trait, so the local disk, an in-memory test tree and an
//! authenticated remote module are interchangeable.

mod local;
mod memory;
mod remote;

pub use local::LocalReplica;
pub use memory::{FaultOp, MemoryReplica};
pub use remote::{AuthCallback, Connector, Credentials, DirectoryConnector, RemoteReplica};

use crate::error::{ReplicaError, ReplicaResult};
use csync_core::{Checksum, EntryType, ExcludeSet, FileEntry, TraversalError};
use std::io::Read;

/// What a backend can promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaCapabilities {
    /// Inode and device numbers survive renames and identify a file.
    pub stable_inodes: bool,
    /// `set_times` can set modification times.
    pub settable_mtime: bool,
}

/// One listed item: an entry or a path that could not be listed.
pub type ListItem = Result<FileEntry, TraversalError>;

/// Storage capability of one side of a sync.
///
/// Paths are replica-relative and `/`-separated; the empty path is the root.
pub trait Replica: Send + Sync {
    /// Human readable description, used in logs and errors.
    fn describe(&self) -> String;

    /// Returns the backend's capabilities.
    fn capabilities(&self) -> ReplicaCapabilities;

    /// Lists the whole tree, parents before children.
    ///
    /// `excludes` is a pruning hint: a backend may skip the contents of
    /// excluded directories but must still list the directories themselves.
    ///
    /// # Errors
    ///
    /// Fails only when the root itself cannot be listed; per-path problems
    /// are reported as [`TraversalError`] items.
    fn list(&self, excludes: &ExcludeSet) -> ReplicaResult<Vec<ListItem>>;

    /// Returns the current metadata of `path`.
    fn stat(&self, path: &str) -> ReplicaResult<FileEntry>;

    /// Opens a file for reading.
    fn read(&self, path: &str) -> ReplicaResult<Box<dyn Read + Send>>;

    /// Replaces the content of `path` with everything `data` yields,
    /// returning the byte count. The parent directory must exist.
    fn write(&self, path: &str, data: &mut dyn Read) -> ReplicaResult<u64>;

    /// Creates a directory. The parent must exist.
    fn mkdir(&self, path: &str) -> ReplicaResult<()>;

    /// Removes a file, symlink or empty directory.
    fn remove(&self, path: &str) -> ReplicaResult<()>;

    /// Removes a path and everything below it.
    fn remove_all(&self, path: &str) -> ReplicaResult<()>;

    /// Moves `from` to `to`. Fails if `to` exists.
    fn rename(&self, from: &str, to: &str) -> ReplicaResult<()>;

    /// Sets modification time and permission bits. A no-op for symlinks.
    fn set_times(&self, path: &str, mtime: i64, mode: u32) -> ReplicaResult<()>;

    /// Returns a symlink's target.
    fn read_link(&self, path: &str) -> ReplicaResult<String> {
        Err(ReplicaError::Unsupported {
            operation: "read_link",
            replica: format!("{} ({path})", self.describe()),
        })
    }

    /// Creates a symlink at `path` pointing to `target`.
    fn symlink(&self, target: &str, path: &str) -> ReplicaResult<()> {
        Err(ReplicaError::Unsupported {
            operation: "symlink",
            replica: format!("{} ({path} -> {target})", self.describe()),
        })
    }
}

/// Computes the checksum that identifies an entry's content: the bytes of
/// a file, or the target of a symlink.
pub fn content_checksum(
    replica: &dyn Replica,
    path: &str,
    entry_type: EntryType,
) -> ReplicaResult<Checksum> {
    match entry_type {
        EntryType::File => {
            let reader = replica.read(path)?;
            Checksum::of_reader(reader).map_err(|e| ReplicaError::io(path, e))
        }
        EntryType::Symlink => Ok(Checksum::of_bytes(replica.read_link(path)?.as_bytes())),
        EntryType::Directory => Err(ReplicaError::Unsupported {
            operation: "checksum of a directory",
            replica: replica.describe(),
        }),
    }
}
