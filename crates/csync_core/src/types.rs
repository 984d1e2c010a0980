//! Core type definitions for csync.

use crate::checksum::Checksum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which replica a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The local replica.
    Local,
    /// The remote replica.
    Remote,
}

impl Side {
    /// Returns the opposite replica.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Side::Local => Side::Remote,
            Side::Remote => Side::Local,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => f.write_str("local"),
            Side::Remote => f.write_str("remote"),
        }
    }
}

/// Type of a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link (listed as the link itself).
    Symlink,
}

impl EntryType {
    /// Returns true for directories.
    #[must_use]
    pub const fn is_dir(self) -> bool {
        matches!(self, EntryType::Directory)
    }
}

/// One filesystem object in a replica at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Replica-relative, `/`-separated path.
    pub path: String,
    /// Object type.
    pub entry_type: EntryType,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Modification time in whole seconds since the UNIX epoch.
    pub mtime: i64,
    /// Permission bits.
    pub mode: u32,
    /// Inode number, if the backend exposes one.
    pub inode: Option<u64>,
    /// Device number, if the backend exposes one.
    pub device: Option<u64>,
    /// Content checksum, filled in lazily.
    pub checksum: Option<Checksum>,
}

impl FileEntry {
    /// Creates a regular file entry.
    pub fn file(path: impl Into<String>, size: u64, mtime: i64) -> Self {
        Self {
            path: path.into(),
            entry_type: EntryType::File,
            size,
            mtime,
            mode: 0o644,
            inode: None,
            device: None,
            checksum: None,
        }
    }

    /// Creates a directory entry.
    pub fn directory(path: impl Into<String>, mtime: i64) -> Self {
        Self {
            path: path.into(),
            entry_type: EntryType::Directory,
            size: 0,
            mtime,
            mode: 0o755,
            inode: None,
            device: None,
            checksum: None,
        }
    }

    /// Sets the inode and device identifiers.
    #[must_use]
    pub fn with_identity(mut self, inode: u64, device: u64) -> Self {
        self.inode = Some(inode);
        self.device = Some(device);
        self
    }

    /// Sets the permission bits.
    #[must_use]
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Returns `(inode, device)` when both are known.
    #[must_use]
    pub fn identity(&self) -> Option<(u64, u64)> {
        self.inode.zip(self.device)
    }

    /// Returns this entry's stamp.
    #[must_use]
    pub fn stamp(&self) -> Stamp {
        Stamp {
            mtime: self.mtime,
            inode: self.inode,
            device: self.device,
        }
    }
}

/// The per-replica part of a path's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stamp {
    /// Modification time in seconds since the UNIX epoch.
    pub mtime: i64,
    /// Inode number, if known.
    pub inode: Option<u64>,
    /// Device number, if known.
    pub device: Option<u64>,
}

impl Stamp {
    /// Returns `(inode, device)` when both are known.
    #[must_use]
    pub fn identity(&self) -> Option<(u64, u64)> {
        self.inode.zip(self.device)
    }
}

/// Verdict attached to a path by update detection and reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Instruction {
    /// No change.
    #[default]
    None,
    /// Created since the base version; create on the other side.
    New,
    /// Content changed since the base version; update the other side.
    Modified,
    /// Removed since the base version; remove on the other side.
    Deleted,
    /// Metadata changed with identical content, or the type changed.
    Evil,
    /// Both sides changed incompatibly.
    Conflict,
    /// Moved with unchanged content.
    Rename,
    /// Excluded or unreadable; never propagated.
    Ignore,
    /// Detection or propagation failed; retried next run.
    Error,
}

impl Instruction {
    /// Returns the upper-case name used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Instruction::None => "NONE",
            Instruction::New => "NEW",
            Instruction::Modified => "MODIFIED",
            Instruction::Deleted => "DELETED",
            Instruction::Evil => "EVIL",
            Instruction::Conflict => "CONFLICT",
            Instruction::Rename => "RENAME",
            Instruction::Ignore => "IGNORE",
            Instruction::Error => "ERROR",
        }
    }

    /// Returns true if the instruction asks for work on the other replica.
    #[must_use]
    pub const fn is_change(self) -> bool {
        matches!(
            self,
            Instruction::New
                | Instruction::Modified
                | Instruction::Deleted
                | Instruction::Evil
                | Instruction::Rename
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_other() {
        assert_eq!(Side::Local.other(), Side::Remote);
        assert_eq!(Side::Remote.other(), Side::Local);
        assert_eq!(Side::Remote.to_string(), "remote");
    }

    #[test]
    fn entry_builders() {
        let file = FileEntry::file("a.txt", 10, 100).with_identity(7, 1).with_mode(0o600);
        assert_eq!(file.entry_type, EntryType::File);
        assert_eq!(file.identity(), Some((7, 1)));
        assert_eq!(file.mode, 0o600);
        assert_eq!(
            file.stamp(),
            Stamp {
                mtime: 100,
                inode: Some(7),
                device: Some(1)
            }
        );

        let dir = FileEntry::directory("docs", 5);
        assert!(dir.entry_type.is_dir());
        assert_eq!(dir.identity(), None);
    }

    #[test]
    fn instruction_names() {
        assert_eq!(Instruction::default(), Instruction::None);
        assert_eq!(Instruction::Evil.to_string(), "EVIL");
        assert!(Instruction::Rename.is_change());
        assert!(!Instruction::Conflict.is_change());
        assert!(!Instruction::Ignore.is_change());
    }
}
