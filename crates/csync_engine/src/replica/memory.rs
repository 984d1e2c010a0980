//! An in-memory replica with fault injection, for tests and simulations.

use super::{ListItem, Replica, ReplicaCapabilities};
use crate::error::{ReplicaError, ReplicaResult};
use csync_core::{path, EntryType, ExcludeSet, FileEntry, TraversalError};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOp {
    /// `stat`
    Stat,
    /// `read` and `read_link`
    Read,
    /// `write` and `symlink`
    Write,
    /// `mkdir`
    Mkdir,
    /// `remove` and `remove_all`
    Remove,
    /// `rename`, keyed by the source path
    Rename,
    /// `set_times`
    SetTimes,
}

impl FaultOp {
    fn name(self) -> &'static str {
        match self {
            FaultOp::Stat => "stat",
            FaultOp::Read => "read",
            FaultOp::Write => "write",
            FaultOp::Mkdir => "mkdir",
            FaultOp::Remove => "remove",
            FaultOp::Rename => "rename",
            FaultOp::SetTimes => "set_times",
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    entry_type: EntryType,
    data: Vec<u8>,
    mtime: i64,
    mode: u32,
    inode: u64,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    kind: std::io::ErrorKind,
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    next_inode: u64,
    clock: i64,
    faults: HashMap<(FaultOp, String), Fault>,
    listing_failures: BTreeMap<String, String>,
    unreachable: bool,
}

impl State {
    fn allocate_inode(&mut self) -> u64 {
        self.next_inode += 1;
        self.next_inode
    }

    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    fn parent_is_dir(&self, path: &str) -> bool {
        match path::parent(path) {
            None => true,
            Some(parent) => self
                .nodes
                .get(parent)
                .is_some_and(|n| n.entry_type.is_dir()),
        }
    }

    fn parent_writable(&self, path: &str) -> bool {
        match path::parent(path) {
            None => true,
            Some(parent) => self.nodes.get(parent).map_or(true, |n| n.mode & 0o200 != 0),
        }
    }

    fn has_children(&self, path: &str) -> bool {
        let (start, end) = path::descendant_range(path);
        self.nodes.range(start..end).next().is_some()
    }

    fn remove_subtree(&mut self, path: &str) {
        let (start, end) = path::descendant_range(path);
        let doomed: Vec<String> = self.nodes.range(start..end).map(|(k, _)| k.clone()).collect();
        for key in doomed {
            self.nodes.remove(&key);
        }
        self.nodes.remove(path);
    }
}

/// A replica kept entirely in memory.
///
/// Mutating operations advance a logical clock that stamps modification
/// times, so writes are distinguishable without sleeping. A directory
/// without the owner write bit refuses changes to its entries, as on disk.
/// The `put_*` helpers ignore that.
#[derive(Debug)]
pub struct MemoryReplica {
    name: String,
    device: u64,
    capabilities: ReplicaCapabilities,
    state: RwLock<State>,
}

impl MemoryReplica {
    /// Creates an empty replica.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: 1,
            capabilities: ReplicaCapabilities {
                stable_inodes: true,
                settable_mtime: true,
            },
            state: RwLock::new(State {
                next_inode: 100,
                clock: 1_700_000_000,
                ..State::default()
            }),
        }
    }

    /// Sets the device number reported for every entry.
    #[must_use]
    pub fn with_device(mut self, device: u64) -> Self {
        self.device = device;
        self
    }

    /// Sets whether inode numbers are reported as stable.
    #[must_use]
    pub fn with_stable_inodes(mut self, stable: bool) -> Self {
        self.capabilities.stable_inodes = stable;
        self
    }

    /// Sets whether `set_times` can change modification times.
    #[must_use]
    pub fn with_settable_mtime(mut self, settable: bool) -> Self {
        self.capabilities.settable_mtime = settable;
        self
    }

    fn insert(&self, path: &str, entry_type: EntryType, data: Vec<u8>, mtime: i64) {
        let path = normalized(path);
        let mut state = self.state.write();
        let ancestors: Vec<String> = path::ancestors(&path).map(str::to_string).collect();
        for ancestor in ancestors.into_iter().rev() {
            if !state.nodes.contains_key(&ancestor) {
                let inode = state.allocate_inode();
                state.nodes.insert(
                    ancestor,
                    Node {
                        entry_type: EntryType::Directory,
                        data: Vec::new(),
                        mtime,
                        mode: 0o755,
                        inode,
                    },
                );
            }
        }
        let inode = state.allocate_inode();
        let mode = if entry_type.is_dir() { 0o755 } else { 0o644 };
        state.nodes.insert(
            path,
            Node {
                entry_type,
                data,
                mtime,
                mode,
                inode,
            },
        );
    }

    /// Creates a directory (and missing parents).
    pub fn put_dir(&self, path: &str, mtime: i64) {
        self.insert(path, EntryType::Directory, Vec::new(), mtime);
    }

    /// Creates or replaces a file (creating missing parents). The file gets
    /// a fresh inode, as an editor's save-by-rename would.
    pub fn put_file(&self, path: &str, content: impl AsRef<[u8]>, mtime: i64) {
        self.insert(path, EntryType::File, content.as_ref().to_vec(), mtime);
    }

    /// Overwrites a file's content in place, keeping its inode.
    pub fn edit_file(&self, path: &str, content: impl AsRef<[u8]>, mtime: i64) {
        let mut state = self.state.write();
        if let Some(node) = state.nodes.get_mut(path) {
            node.data = content.as_ref().to_vec();
            node.mtime = mtime;
        }
    }

    /// Creates a symlink (creating missing parents).
    pub fn put_symlink(&self, path: &str, target: &str, mtime: i64) {
        self.insert(path, EntryType::Symlink, target.as_bytes().to_vec(), mtime);
    }

    /// Sets a path's modification time.
    pub fn touch(&self, path: &str, mtime: i64) {
        if let Some(node) = self.state.write().nodes.get_mut(path) {
            node.mtime = mtime;
        }
    }

    /// Sets a path's permission bits.
    pub fn chmod(&self, path: &str, mode: u32) {
        if let Some(node) = self.state.write().nodes.get_mut(path) {
            node.mode = mode;
        }
    }

    /// Sets a path's inode number.
    pub fn set_inode(&self, path: &str, inode: u64) {
        if let Some(node) = self.state.write().nodes.get_mut(path) {
            node.inode = inode;
        }
    }

    /// Deletes a path and everything below it.
    pub fn delete(&self, path: &str) {
        self.state.write().remove_subtree(path);
    }

    /// Moves a path (and its subtree) keeping inodes, like `mv`.
    ///
    /// # Errors
    ///
    /// Same as [`Replica::rename`].
    pub fn move_path(&self, from: &str, to: &str) -> ReplicaResult<()> {
        Replica::rename(self, from, to)
    }

    /// Returns the content of a file or symlink.
    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.state
            .read()
            .nodes
            .get(path)
            .filter(|n| !n.entry_type.is_dir())
            .map(|n| n.data.clone())
    }

    /// Returns the entry for a path.
    pub fn entry(&self, path: &str) -> Option<FileEntry> {
        let state = self.state.read();
        state.nodes.get(path).map(|n| self.entry_for(path, n))
    }

    /// Returns true if the path exists.
    pub fn exists(&self, path: &str) -> bool {
        self.state.read().nodes.contains_key(path)
    }

    /// Returns every path in order.
    pub fn paths(&self) -> Vec<String> {
        self.state.read().nodes.keys().cloned().collect()
    }

    /// Makes `op` on `path` fail with `kind`, `times` times (forever when
    /// `None`).
    pub fn inject_fault(&self, op: FaultOp, path: &str, kind: std::io::ErrorKind, times: Option<u32>) {
        self.state.write().faults.insert(
            (op, path.to_string()),
            Fault {
                kind,
                remaining: times,
            },
        );
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        let mut state = self.state.write();
        state.faults.clear();
        state.listing_failures.clear();
    }

    /// Makes `list` report `path` as a traversal failure.
    pub fn fail_listing(&self, path: &str, reason: &str) {
        self.state
            .write()
            .listing_failures
            .insert(path.to_string(), reason.to_string());
    }

    /// Makes every operation fail as if the root were gone.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.write().unreachable = unreachable;
    }

    fn entry_for(&self, path: &str, node: &Node) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            entry_type: node.entry_type,
            size: if node.entry_type.is_dir() { 0 } else { node.data.len() as u64 },
            mtime: node.mtime,
            mode: node.mode,
            inode: Some(node.inode),
            device: Some(self.device),
            checksum: None,
        }
    }

    fn check(&self, op: FaultOp, path: &str) -> ReplicaResult<()> {
        let mut state = self.state.write();
        if state.unreachable {
            return Err(ReplicaError::Unreachable {
                root: self.describe(),
                message: "simulated outage".into(),
            });
        }
        let key = (op, path.to_string());
        let (kind, exhausted) = match state.faults.get_mut(&key) {
            None => return Ok(()),
            Some(fault) => match fault.remaining {
                Some(0) => (fault.kind, true),
                Some(n) => {
                    fault.remaining = Some(n - 1);
                    (fault.kind, false)
                }
                None => (fault.kind, false),
            },
        };
        if exhausted {
            state.faults.remove(&key);
            return Ok(());
        }
        Err(ReplicaError::Injected {
            operation: op.name(),
            path: path.to_string(),
            kind,
        })
    }

    fn io_error(path: &str, kind: std::io::ErrorKind, message: &str) -> ReplicaError {
        ReplicaError::io(path, std::io::Error::new(kind, message.to_string()))
    }

    fn require_writable_parent(state: &State, path: &str) -> ReplicaResult<()> {
        if state.parent_writable(path) {
            Ok(())
        } else {
            Err(Self::io_error(path, std::io::ErrorKind::PermissionDenied, "permission denied"))
        }
    }
}

fn normalized(path: &str) -> String {
    path::normalize(path).unwrap_or_else(|_| path.to_string())
}

impl Replica for MemoryReplica {
    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn capabilities(&self) -> ReplicaCapabilities {
        self.capabilities
    }

    fn list(&self, excludes: &ExcludeSet) -> ReplicaResult<Vec<ListItem>> {
        let state = self.state.read();
        if state.unreachable {
            return Err(ReplicaError::Unreachable {
                root: self.describe(),
                message: "simulated outage".into(),
            });
        }

        let mut items = Vec::with_capacity(state.nodes.len());
        let mut pruned: Option<String> = None;
        for (path, node) in &state.nodes {
            if let Some(dir) = &pruned {
                if path::is_ancestor(dir, path) {
                    continue;
                }
                pruned = None;
            }
            if let Some(reason) = state.listing_failures.get(path) {
                items.push(Err(TraversalError::new(path.clone(), reason.clone())));
                continue;
            }
            if node.entry_type.is_dir() && excludes.is_excluded_entry(path, true) {
                pruned = Some(path.clone());
            }
            items.push(Ok(self.entry_for(path, node)));
        }
        Ok(items)
    }

    fn stat(&self, path: &str) -> ReplicaResult<FileEntry> {
        self.check(FaultOp::Stat, path)?;
        let state = self.state.read();
        state
            .nodes
            .get(path)
            .map(|n| self.entry_for(path, n))
            .ok_or_else(|| ReplicaError::not_found(path))
    }

    fn read(&self, path: &str) -> ReplicaResult<Box<dyn Read + Send>> {
        self.check(FaultOp::Read, path)?;
        let state = self.state.read();
        match state.nodes.get(path) {
            Some(node) if node.entry_type == EntryType::File => {
                Ok(Box::new(Cursor::new(node.data.clone())))
            }
            Some(_) => Err(Self::io_error(path, std::io::ErrorKind::InvalidInput, "not a file")),
            None => Err(ReplicaError::not_found(path)),
        }
    }

    fn write(&self, path: &str, data: &mut dyn Read) -> ReplicaResult<u64> {
        self.check(FaultOp::Write, path)?;
        let mut buf = Vec::new();
        data.read_to_end(&mut buf)
            .map_err(|e| ReplicaError::io(path, e))?;

        let mut state = self.state.write();
        if !state.parent_is_dir(path) {
            return Err(ReplicaError::not_found(path::parent(path).unwrap_or(path)));
        }
        Self::require_writable_parent(&state, path)?;
        let mode = match state.nodes.get(path) {
            Some(node) if node.entry_type.is_dir() => {
                return Err(Self::io_error(path, std::io::ErrorKind::Other, "is a directory"));
            }
            Some(node) => node.mode,
            None => 0o644,
        };
        let inode = state.allocate_inode();
        let mtime = state.tick();
        let written = buf.len() as u64;
        state.nodes.insert(
            path.to_string(),
            Node {
                entry_type: EntryType::File,
                data: buf,
                mtime,
                mode,
                inode,
            },
        );
        Ok(written)
    }

    fn mkdir(&self, path: &str) -> ReplicaResult<()> {
        self.check(FaultOp::Mkdir, path)?;
        let mut state = self.state.write();
        if state.nodes.contains_key(path) {
            return Err(Self::io_error(path, std::io::ErrorKind::AlreadyExists, "exists"));
        }
        if !state.parent_is_dir(path) {
            return Err(ReplicaError::not_found(path::parent(path).unwrap_or(path)));
        }
        Self::require_writable_parent(&state, path)?;
        let inode = state.allocate_inode();
        let mtime = state.tick();
        state.nodes.insert(
            path.to_string(),
            Node {
                entry_type: EntryType::Directory,
                data: Vec::new(),
                mtime,
                mode: 0o755,
                inode,
            },
        );
        Ok(())
    }

    fn remove(&self, path: &str) -> ReplicaResult<()> {
        self.check(FaultOp::Remove, path)?;
        let mut state = self.state.write();
        if !state.nodes.contains_key(path) {
            return Err(ReplicaError::not_found(path));
        }
        if state.has_children(path) {
            return Err(Self::io_error(path, std::io::ErrorKind::Other, "directory not empty"));
        }
        Self::require_writable_parent(&state, path)?;
        state.nodes.remove(path);
        Ok(())
    }

    fn remove_all(&self, path: &str) -> ReplicaResult<()> {
        self.check(FaultOp::Remove, path)?;
        let mut state = self.state.write();
        if !state.nodes.contains_key(path) {
            return Err(ReplicaError::not_found(path));
        }
        Self::require_writable_parent(&state, path)?;
        state.remove_subtree(path);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> ReplicaResult<()> {
        self.check(FaultOp::Rename, from)?;
        let mut state = self.state.write();
        if !state.nodes.contains_key(from) {
            return Err(ReplicaError::not_found(from));
        }
        if state.nodes.contains_key(to) {
            return Err(Self::io_error(to, std::io::ErrorKind::AlreadyExists, "rename target exists"));
        }
        if !state.parent_is_dir(to) {
            return Err(ReplicaError::not_found(path::parent(to).unwrap_or(to)));
        }
        Self::require_writable_parent(&state, from)?;
        Self::require_writable_parent(&state, to)?;

        let (start, end) = path::descendant_range(from);
        let moved: Vec<String> = std::iter::once(from.to_string())
            .chain(state.nodes.range(start..end).map(|(k, _)| k.clone()))
            .collect();
        for old in moved {
            if let Some(node) = state.nodes.remove(&old) {
                let new = format!("{to}{}", &old[from.len()..]);
                state.nodes.insert(new, node);
            }
        }
        Ok(())
    }

    fn set_times(&self, path: &str, mtime: i64, mode: u32) -> ReplicaResult<()> {
        self.check(FaultOp::SetTimes, path)?;
        let settable = self.capabilities.settable_mtime;
        let mut state = self.state.write();
        let node = state
            .nodes
            .get_mut(path)
            .ok_or_else(|| ReplicaError::not_found(path))?;
        if node.entry_type == EntryType::Symlink {
            return Ok(());
        }
        if settable {
            node.mtime = mtime;
        }
        node.mode = mode;
        Ok(())
    }

    fn read_link(&self, path: &str) -> ReplicaResult<String> {
        self.check(FaultOp::Read, path)?;
        let state = self.state.read();
        match state.nodes.get(path) {
            Some(node) if node.entry_type == EntryType::Symlink => {
                String::from_utf8(node.data.clone()).map_err(|_| {
                    Self::io_error(path, std::io::ErrorKind::InvalidData, "target is not UTF-8")
                })
            }
            Some(_) => Err(Self::io_error(path, std::io::ErrorKind::InvalidInput, "not a symlink")),
            None => Err(ReplicaError::not_found(path)),
        }
    }

    fn symlink(&self, target: &str, path: &str) -> ReplicaResult<()> {
        self.check(FaultOp::Write, path)?;
        let mut state = self.state.write();
        if state.nodes.contains_key(path) {
            return Err(Self::io_error(path, std::io::ErrorKind::AlreadyExists, "exists"));
        }
        if !state.parent_is_dir(path) {
            return Err(ReplicaError::not_found(path::parent(path).unwrap_or(path)));
        }
        Self::require_writable_parent(&state, path)?;
        let inode = state.allocate_inode();
        let mtime = state.tick();
        state.nodes.insert(
            path.to_string(),
            Node {
                entry_type: EntryType::Symlink,
                data: target.as_bytes().to_vec(),
                mtime,
                mode: 0o777,
                inode,
            },
        );
        Ok(())
    }
}
