//! Replica pair fixtures.
//!
//! Each fixture owns a temporary configuration directory, so journals and
//! locks never leak between tests.

use csync_engine::{LocalReplica, MemoryReplica, RunReport, SyncConfig, SyncContext};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Two in-memory replicas with a private configuration directory.
pub struct MemoryPair {
    /// The local replica (device 1).
    pub local: Arc<MemoryReplica>,
    /// The remote replica (device 2).
    pub remote: Arc<MemoryReplica>,
    config_dir: TempDir,
}

impl MemoryPair {
    /// Creates two empty replicas.
    pub fn new() -> Self {
        Self::with_replicas(
            MemoryReplica::new("local").with_device(1),
            MemoryReplica::new("remote").with_device(2),
        )
    }

    /// Uses the given replicas.
    pub fn with_replicas(local: MemoryReplica, remote: MemoryReplica) -> Self {
        Self {
            local: Arc::new(local),
            remote: Arc::new(remote),
            config_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Configuration directory shared by every run of this pair.
    pub fn config_dir(&self) -> &Path {
        self.config_dir.path()
    }

    /// Default configuration pointing at this pair's config directory.
    pub fn config(&self) -> SyncConfig {
        SyncConfig::new().with_config_dir(self.config_dir.path())
    }

    /// Creates a context for this pair.
    pub fn context(&self, config: SyncConfig) -> SyncContext {
        SyncContext::create(self.local.clone(), self.remote.clone(), config)
            .expect("Failed to create sync context")
    }

    /// Runs one full sync with the default configuration.
    pub fn sync(&self) -> RunReport {
        self.sync_with(self.config())
    }

    /// Runs one full sync with `config` and releases the context.
    pub fn sync_with(&self, config: SyncConfig) -> RunReport {
        let mut context = self.context(config);
        let report = context.run();
        context.destroy().expect("Failed to write back the journal");
        report
    }
}

impl Default for MemoryPair {
    fn default() -> Self {
        Self::new()
    }
}

/// Which directory of a [`DiskPair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    /// The local directory.
    Local,
    /// The remote directory.
    Remote,
}

/// Two directories on disk plus a configuration directory, all under one
/// temporary root.
pub struct DiskPair {
    temp: TempDir,
}

impl DiskPair {
    /// Creates `local/`, `remote/` and `config/` under a fresh temp dir.
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp directory");
        for dir in ["local", "remote", "config"] {
            fs::create_dir(temp.path().join(dir)).expect("Failed to create fixture directory");
        }
        Self { temp }
    }

    /// Path of a root directory.
    pub fn root(&self, root: Root) -> PathBuf {
        match root {
            Root::Local => self.temp.path().join("local"),
            Root::Remote => self.temp.path().join("remote"),
        }
    }

    /// Configuration directory.
    pub fn config_dir(&self) -> PathBuf {
        self.temp.path().join("config")
    }

    /// Absolute path of `path` under `root`.
    pub fn path(&self, root: Root, path: &str) -> PathBuf {
        self.root(root).join(path)
    }

    /// Writes a file, creating parent directories.
    pub fn write(&self, root: Root, path: &str, content: impl AsRef<[u8]>) {
        let full = self.path(root, path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(full, content).expect("Failed to write fixture file");
    }

    /// Reads a file, `None` if it does not exist.
    pub fn read(&self, root: Root, path: &str) -> Option<Vec<u8>> {
        fs::read(self.path(root, path)).ok()
    }

    /// Returns true if `path` exists under `root`.
    pub fn exists(&self, root: Root, path: &str) -> bool {
        self.path(root, path).symlink_metadata().is_ok()
    }

    /// Removes a file or directory tree.
    pub fn remove(&self, root: Root, path: &str) {
        let full = self.path(root, path);
        let result = if full.is_dir() {
            fs::remove_dir_all(&full)
        } else {
            fs::remove_file(&full)
        };
        result.expect("Failed to remove fixture path");
    }

    /// Sets a path's modification time (whole seconds).
    pub fn set_mtime(&self, root: Root, path: &str, secs: u64) {
        let time = std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs);
        let file = fs::File::options()
            .write(true)
            .open(self.path(root, path))
            .expect("Failed to open fixture file");
        file.set_modified(time).expect("Failed to set modification time");
    }

    /// Default configuration for this pair.
    pub fn config(&self) -> SyncConfig {
        SyncConfig::new().with_config_dir(self.config_dir())
    }

    /// Creates a context over both directories.
    pub fn context(&self, config: SyncConfig) -> SyncContext {
        SyncContext::create(
            Arc::new(LocalReplica::new(self.root(Root::Local))),
            Arc::new(LocalReplica::new(self.root(Root::Remote))),
            config,
        )
        .expect("Failed to create sync context")
    }

    /// Runs one full sync and releases the context.
    pub fn sync(&self) -> RunReport {
        let mut context = self.context(self.config());
        let report = context.run();
        context.destroy().expect("Failed to write back the journal");
        report
    }
}

impl Default for DiskPair {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csync_engine::RunStatus;

    #[test]
    fn memory_pair_syncs() {
        let pair = MemoryPair::new();
        pair.local.put_file("a.txt", "x", 1_000);
        assert_eq!(pair.sync().status, RunStatus::Success);
        assert!(pair.remote.exists("a.txt"));
        assert!(pair.config_dir().join("csync_journal.db").exists());
    }

    #[test]
    fn disk_pair_layout() {
        let pair = DiskPair::new();
        pair.write(Root::Local, "d/f.txt", "data");
        assert_eq!(pair.read(Root::Local, "d/f.txt").unwrap(), b"data");
        assert!(!pair.exists(Root::Remote, "d"));
        pair.remove(Root::Local, "d");
        assert!(!pair.exists(Root::Local, "d/f.txt"));
    }
}
