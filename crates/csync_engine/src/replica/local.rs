//! A replica rooted in a local directory.

use super::{ListItem, Replica, ReplicaCapabilities};
use crate::error::{ReplicaError, ReplicaResult};
use csync_core::{path, EntryType, ExcludeSet, FileEntry, SymlinkPolicy, TraversalError};
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

/// Suffix of the temporary file used by atomic writes.
const TEMP_SUFFIX: &str = ".csync-tmp";

/// A directory on local disk.
///
/// Writes are atomic: data goes to `.<name>.csync-tmp` next to the target,
/// is synced, then renamed over the target.
#[derive(Debug, Clone)]
pub struct LocalReplica {
    root: PathBuf,
    symlinks: SymlinkPolicy,
}

impl LocalReplica {
    /// Creates a replica rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            symlinks: SymlinkPolicy::default(),
        }
    }

    /// Sets the symlink policy.
    #[must_use]
    pub fn with_symlinks(mut self, symlinks: SymlinkPolicy) -> Self {
        self.symlinks = symlinks;
        self
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }

    fn relative(&self, full: &Path) -> Result<String, TraversalError> {
        let shown = full.display().to_string();
        let rel = full
            .strip_prefix(&self.root)
            .map_err(|_| TraversalError::new(shown.clone(), "outside the replica root"))?;
        let rel = rel
            .to_str()
            .ok_or_else(|| TraversalError::new(shown.clone(), "path is not valid UTF-8"))?;
        path::normalize(rel).map_err(|e| TraversalError::new(shown, e.to_string()))
    }

    fn metadata(&self, full: &Path) -> io::Result<Metadata> {
        match self.symlinks {
            SymlinkPolicy::Preserve => fs::symlink_metadata(full),
            SymlinkPolicy::Follow => fs::metadata(full),
        }
    }

    fn unreachable(&self, message: impl ToString) -> ReplicaError {
        ReplicaError::Unreachable {
            root: self.describe(),
            message: message.to_string(),
        }
    }

    fn check_root(&self) -> ReplicaResult<()> {
        match fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(self.unreachable("root is not a directory")),
            Err(e) => Err(self.unreachable(e)),
        }
    }
}

fn entry_from_metadata(path: String, meta: &Metadata) -> FileEntry {
    let file_type = meta.file_type();
    let entry_type = if file_type.is_dir() {
        EntryType::Directory
    } else if file_type.is_symlink() {
        EntryType::Symlink
    } else {
        EntryType::File
    };

    let (mtime, mode, inode, device) = platform_stat(meta);
    FileEntry {
        path,
        entry_type,
        size: if entry_type.is_dir() { 0 } else { meta.len() },
        mtime,
        mode,
        inode,
        device,
        checksum: None,
    }
}

#[cfg(unix)]
fn platform_stat(meta: &Metadata) -> (i64, u32, Option<u64>, Option<u64>) {
    use std::os::unix::fs::MetadataExt;
    (meta.mtime(), meta.mode() & 0o7777, Some(meta.ino()), Some(meta.dev()))
}

#[cfg(not(unix))]
fn platform_stat(meta: &Metadata) -> (i64, u32, Option<u64>, Option<u64>) {
    let mtime = meta
        .modified()
        .ok()
        .map(|t| match t.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        })
        .unwrap_or(0);
    let mode = match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    };
    (mtime, mode, None, None)
}

fn system_time(mtime: i64) -> SystemTime {
    if mtime >= 0 {
        UNIX_EPOCH + Duration::from_secs(mtime as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(mtime.unsigned_abs())
    }
}

#[cfg(unix)]
fn set_mode(full: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(full, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(full: &Path, mode: u32) -> io::Result<()> {
    let mut permissions = fs::metadata(full)?.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(full, permissions)
}

impl Replica for LocalReplica {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    fn capabilities(&self) -> ReplicaCapabilities {
        ReplicaCapabilities {
            stable_inodes: cfg!(unix),
            settable_mtime: true,
        }
    }

    fn list(&self, excludes: &ExcludeSet) -> ReplicaResult<Vec<ListItem>> {
        self.check_root()?;

        let mut items = Vec::new();
        let mut walker = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(self.symlinks == SymlinkPolicy::Follow)
            .sort_by_file_name()
            .into_iter();

        while let Some(next) = walker.next() {
            match next {
                Ok(dent) => {
                    let rel = match self.relative(dent.path()) {
                        Ok(rel) => rel,
                        Err(err) => {
                            if dent.file_type().is_dir() {
                                walker.skip_current_dir();
                            }
                            items.push(Err(err));
                            continue;
                        }
                    };
                    let meta = match dent.metadata() {
                        Ok(meta) => meta,
                        Err(err) => {
                            items.push(Err(TraversalError::new(rel, err.to_string())));
                            continue;
                        }
                    };
                    let entry = entry_from_metadata(rel, &meta);
                    if entry.entry_type.is_dir() && excludes.is_excluded_entry(&entry.path, true) {
                        walker.skip_current_dir();
                    }
                    items.push(Ok(entry));
                }
                Err(err) => {
                    let rel = err.path().and_then(|p| self.relative(p).ok());
                    match rel {
                        Some(rel) => items.push(Err(TraversalError::new(rel, err.to_string()))),
                        None if err.depth() == 0 => return Err(self.unreachable(err)),
                        None => {
                            tracing::warn!(root = %self.root.display(), error = %err, "unattributable traversal error");
                        }
                    }
                }
            }
        }

        tracing::debug!(replica = %self.describe(), items = items.len(), "listed local tree");
        Ok(items)
    }

    fn stat(&self, path: &str) -> ReplicaResult<FileEntry> {
        let meta = self
            .metadata(&self.full_path(path))
            .map_err(|e| ReplicaError::io(path, e))?;
        Ok(entry_from_metadata(path.to_string(), &meta))
    }

    fn read(&self, path: &str) -> ReplicaResult<Box<dyn Read + Send>> {
        let file = File::open(self.full_path(path)).map_err(|e| ReplicaError::io(path, e))?;
        Ok(Box::new(file))
    }

    fn write(&self, path: &str, data: &mut dyn Read) -> ReplicaResult<u64> {
        let full = self.full_path(path);
        let temp = self.full_path(&path::join(
            path::parent(path).unwrap_or(""),
            &format!(".{}{TEMP_SUFFIX}", path::file_name(path)),
        ));

        let result = (|| -> io::Result<u64> {
            let mut file = File::create(&temp)?;
            let written = io::copy(data, &mut file)?;
            file.flush()?;
            file.sync_all()?;
            drop(file);
            fs::rename(&temp, &full)?;
            Ok(written)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        result.map_err(|e| ReplicaError::io(path, e))
    }

    fn mkdir(&self, path: &str) -> ReplicaResult<()> {
        fs::create_dir(self.full_path(path)).map_err(|e| ReplicaError::io(path, e))
    }

    fn remove(&self, path: &str) -> ReplicaResult<()> {
        let full = self.full_path(path);
        let meta = fs::symlink_metadata(&full).map_err(|e| ReplicaError::io(path, e))?;
        if meta.is_dir() {
            fs::remove_dir(&full)
        } else {
            fs::remove_file(&full)
        }
        .map_err(|e| ReplicaError::io(path, e))
    }

    fn remove_all(&self, path: &str) -> ReplicaResult<()> {
        let full = self.full_path(path);
        let meta = fs::symlink_metadata(&full).map_err(|e| ReplicaError::io(path, e))?;
        if meta.is_dir() {
            fs::remove_dir_all(&full)
        } else {
            fs::remove_file(&full)
        }
        .map_err(|e| ReplicaError::io(path, e))
    }

    fn rename(&self, from: &str, to: &str) -> ReplicaResult<()> {
        let target = self.full_path(to);
        if fs::symlink_metadata(&target).is_ok() {
            return Err(ReplicaError::io(
                to,
                io::Error::new(io::ErrorKind::AlreadyExists, "rename target exists"),
            ));
        }
        fs::rename(self.full_path(from), target).map_err(|e| ReplicaError::io(from, e))
    }

    fn set_times(&self, path: &str, mtime: i64, mode: u32) -> ReplicaResult<()> {
        let full = self.full_path(path);
        let meta = fs::symlink_metadata(&full).map_err(|e| ReplicaError::io(path, e))?;
        if meta.file_type().is_symlink() {
            return Ok(());
        }

        let result = (|| -> io::Result<()> {
            let file = File::open(&full)?;
            file.set_modified(system_time(mtime))?;
            drop(file);
            set_mode(&full, mode)
        })();
        result.map_err(|e| ReplicaError::io(path, e))
    }

    fn read_link(&self, path: &str) -> ReplicaResult<String> {
        let target = fs::read_link(self.full_path(path)).map_err(|e| ReplicaError::io(path, e))?;
        target.into_os_string().into_string().map_err(|_| {
            ReplicaError::io(
                path,
                io::Error::new(io::ErrorKind::InvalidData, "symlink target is not UTF-8"),
            )
        })
    }

    #[cfg(unix)]
    fn symlink(&self, target: &str, path: &str) -> ReplicaResult<()> {
        std::os::unix::fs::symlink(target, self.full_path(path)).map_err(|e| ReplicaError::io(path, e))
    }
}
