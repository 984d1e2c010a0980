//! # csync core
//!
//! Data model and persistent state for the csync file synchronizer.
//!
//! This crate provides:
//! - The file tree model: [`FileEntry`], [`FileTree`], [`TreeNode`] and the
//!   per-path [`Instruction`] slot
//! - The journal store: the base version of every previously synced path,
//!   persisted as a CRC-framed append-only log ([`Journal`])
//! - Exclude rules ([`ExcludeSet`])
//! - Content checksums ([`Checksum`])
//! - Configuration directory layout, `csync.conf` parsing and the run lock
//!
//! Update detection, reconciliation and propagation live in `csync_engine`;
//! this crate only holds the state they operate on.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checksum;
pub mod config;
mod error;
mod exclude;
pub mod journal;
#[cfg(feature = "std")]
mod lock;
pub mod path;
mod tree;
mod types;

pub use checksum::{Checksum, ChecksumReader};
pub use config::{ConfigDir, ConfigFile, RenameDetection, SymlinkPolicy};
pub use error::{CoreError, CoreResult};
pub use exclude::ExcludeSet;
pub use journal::{Journal, JournalRecord, JournalState};
#[cfg(feature = "std")]
pub use lock::RunLock;
pub use tree::{FileTree, TraversalError, TreeNode};
pub use types::{EntryType, FileEntry, Instruction, Side, Stamp};

/// Crate version, shared by the whole workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the human readable version string, e.g. `csync version 0.42.0`.
#[must_use]
pub fn csync_version() -> String {
    format!("csync version {VERSION}")
}
