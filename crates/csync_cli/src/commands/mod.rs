//! CLI command implementations.

pub mod journal;
pub mod sync;

use csync_core::ConfigDir;
use std::path::PathBuf;

/// Resolves `--config-dir`, falling back to `~/.csync`.
pub fn config_dir(flag: Option<PathBuf>) -> Result<ConfigDir, Box<dyn std::error::Error>> {
    match flag.or_else(ConfigDir::default_location) {
        Some(path) => Ok(ConfigDir::new(path)),
        None => Err("No home directory found; pass --config-dir".into()),
    }
}
