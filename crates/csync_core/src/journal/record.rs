//! The journal record: base version of one synced path.

use crate::checksum::Checksum;
use crate::types::{EntryType, FileEntry, Side, Stamp};
use serde::{Deserialize, Serialize};

/// Metadata of a path as of the end of its last successful propagation.
///
/// Content-level fields (`entry_type`, `size`, `mode`, `checksum`) are
/// shared by both replicas once the path is in sync. Stamps are per
/// replica: `mtime`/`inode`/`device` describe the local copy and the
/// `remote_*` fields the remote copy, because inode numbers mean nothing
/// across replicas and not every backend can set modification times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Replica-relative path.
    pub path: String,
    /// Object type.
    pub entry_type: EntryType,
    /// Size in bytes.
    pub size: u64,
    /// Permission bits.
    pub mode: u32,
    /// Content checksum, when one was computed.
    pub checksum: Option<Checksum>,
    /// Local modification time.
    pub mtime: i64,
    /// Local inode.
    pub inode: Option<u64>,
    /// Local device.
    pub device: Option<u64>,
    /// Remote modification time.
    pub remote_mtime: i64,
    /// Remote inode.
    pub remote_inode: Option<u64>,
    /// Remote device.
    pub remote_device: Option<u64>,
}

impl JournalRecord {
    /// Builds a record from the two replicas' entries for the same path,
    /// captured right after they were brought in sync.
    #[must_use]
    pub fn from_entries(local: &FileEntry, remote: &FileEntry, checksum: Option<Checksum>) -> Self {
        Self {
            path: local.path.clone(),
            entry_type: local.entry_type,
            size: local.size,
            mode: local.mode,
            checksum: checksum.or(local.checksum).or(remote.checksum),
            mtime: local.mtime,
            inode: local.inode,
            device: local.device,
            remote_mtime: remote.mtime,
            remote_inode: remote.inode,
            remote_device: remote.device,
        }
    }

    /// Returns the stamp recorded for `side`.
    #[must_use]
    pub fn stamp(&self, side: Side) -> Stamp {
        match side {
            Side::Local => Stamp {
                mtime: self.mtime,
                inode: self.inode,
                device: self.device,
            },
            Side::Remote => Stamp {
                mtime: self.remote_mtime,
                inode: self.remote_inode,
                device: self.remote_device,
            },
        }
    }

    /// Returns a copy of this record under another path.
    #[must_use]
    pub fn moved_to(&self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }
}
