//! Configuration directory layout and `csync.conf`.
//!
//! ```text
//! <config_dir>/            # default: ~/.csync
//! ├─ csync.conf            # TOML settings
//! ├─ csync_exclude.conf    # exclude patterns, one per line
//! ├─ csync_journal.db      # journal log
//! └─ lock                  # advisory run lock
//! ```

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the configuration directory under the home directory.
pub const CONFIG_DIR_NAME: &str = ".csync";
/// Settings file name.
pub const CONFIG_FILE: &str = "csync.conf";
/// Exclude list file name.
pub const EXCLUDE_FILE: &str = "csync_exclude.conf";
/// Journal file name.
pub const JOURNAL_FILE: &str = "csync_journal.db";
/// Lock file name.
pub const LOCK_FILE: &str = "lock";

/// How moved files are recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenameDetection {
    /// Never pair ghosts with new paths.
    Disabled,
    /// Pair by (inode, device) when the replica reports stable inodes.
    #[default]
    Inode,
    /// As `Inode`, and confirm the pairing with a content checksum.
    InodeOrContent,
}

/// How symbolic links are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymlinkPolicy {
    /// List the link itself.
    #[default]
    Preserve,
    /// List the link target.
    Follow,
}

/// Parsed `csync.conf`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Retries for transient per-path errors.
    pub max_retries: Option<u32>,
    /// Base delay between retries, in milliseconds.
    pub retry_delay_ms: Option<u64>,
    /// Rename detection mode.
    pub rename_detection: Option<RenameDetection>,
    /// Symlink policy.
    pub symlinks: Option<SymlinkPolicy>,
    /// Verify copies by checksum.
    pub checksum_on_copy: Option<bool>,
}

impl ConfigFile {
    /// Loads `path`. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] if the file cannot be parsed and
    /// [`CoreError::Io`] if it exists but cannot be read.
    pub fn load(path: &Path) -> CoreResult<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parses TOML text; `path` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] on syntax errors, unknown keys or bad
    /// values.
    pub fn parse(text: &str, path: &Path) -> CoreResult<Self> {
        toml::from_str(text).map_err(|e| CoreError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// A csync configuration directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDir {
    path: PathBuf,
}

impl ConfigDir {
    /// Uses `path` as the configuration directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns `~/.csync`, or `None` if no home directory is known.
    #[must_use]
    pub fn default_location() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .filter(|home| !home.is_empty())
            .map(|home| PathBuf::from(home).join(CONFIG_DIR_NAME))
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of `csync.conf`.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.path.join(CONFIG_FILE)
    }

    /// Path of `csync_exclude.conf`.
    #[must_use]
    pub fn exclude_file(&self) -> PathBuf {
        self.path.join(EXCLUDE_FILE)
    }

    /// Path of `csync_journal.db`.
    #[must_use]
    pub fn journal_file(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    /// Path of the lock file.
    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.path.join(LOCK_FILE)
    }

    /// Creates the directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the path
    /// exists and is not a directory.
    pub fn create(&self) -> CoreResult<()> {
        fs::create_dir_all(&self.path)?;
        if !self.path.is_dir() {
            return Err(CoreError::Config {
                path: self.path.clone(),
                message: "configuration path is not a directory".into(),
            });
        }
        Ok(())
    }

    /// Loads `csync.conf` from this directory.
    ///
    /// # Errors
    ///
    /// See [`ConfigFile::load`].
    pub fn load_config(&self) -> CoreResult<ConfigFile> {
        ConfigFile::load(&self.config_file())
    }

    /// Deletes the directory and everything in it. Missing is fine.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    pub fn remove(&self) -> CoreResult<()> {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn layout() {
        let dir = ConfigDir::new("/tmp/cfg");
        assert_eq!(dir.config_file(), PathBuf::from("/tmp/cfg/csync.conf"));
        assert_eq!(dir.exclude_file(), PathBuf::from("/tmp/cfg/csync_exclude.conf"));
        assert_eq!(dir.journal_file(), PathBuf::from("/tmp/cfg/csync_journal.db"));
        assert_eq!(dir.lock_file(), PathBuf::from("/tmp/cfg/lock"));
    }

    #[test]
    fn missing_config_is_default() {
        let dir = tempdir().unwrap();
        let config = ConfigDir::new(dir.path()).load_config().unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn parse_all_keys() {
        let text = r#"
            max_retries = 5
            retry_delay_ms = 10
            rename_detection = "inode-or-content"
            symlinks = "follow"
            checksum_on_copy = true
        "#;
        let config = ConfigFile::parse(text, Path::new("csync.conf")).unwrap();
        assert_eq!(config.max_retries, Some(5));
        assert_eq!(config.retry_delay_ms, Some(10));
        assert_eq!(config.rename_detection, Some(RenameDetection::InodeOrContent));
        assert_eq!(config.symlinks, Some(SymlinkPolicy::Follow));
        assert_eq!(config.checksum_on_copy, Some(true));
    }

    #[test]
    fn bad_config_is_an_error() {
        let err = ConfigFile::parse("rename_detection = \"maybe\"", Path::new("c")).unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));

        let err = ConfigFile::parse("colour = \"blue\"", Path::new("c")).unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[test]
    fn create_and_remove() {
        let root = tempdir().unwrap();
        let dir = ConfigDir::new(root.path().join("nested/.csync"));
        dir.create().unwrap();
        fs::write(dir.config_file(), "max_retries = 1\n").unwrap();
        assert_eq!(dir.load_config().unwrap().max_retries, Some(1));

        dir.remove().unwrap();
        assert!(!dir.path().exists());
        dir.remove().unwrap();
    }
}
