//! Run outcome: status, conflicts, per-path errors and statistics.

use crate::reconcile::ConflictKind;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Overall outcome of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every change was propagated.
    Success,
    /// The run finished, but some paths failed or were not reached before
    /// cancellation. Conflicts alone do not count.
    PartialSuccess,
    /// The run could not proceed.
    Fatal,
}

impl RunStatus {
    /// Numeric status: `0` success, `1` partial success, `-1` fatal.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::PartialSuccess => 1,
            RunStatus::Fatal => -1,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => f.write_str("success"),
            RunStatus::PartialSuccess => f.write_str("partial success"),
            RunStatus::Fatal => f.write_str("fatal"),
        }
    }
}

/// A conflict that was resolved by keeping both versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    /// Conflicting path.
    pub path: String,
    /// Kind of conflict.
    pub kind: ConflictKind,
    /// Where the local version was preserved, for edit/edit conflicts.
    pub aside: Option<String>,
}

/// A path that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathError {
    /// Replica-relative path.
    pub path: String,
    /// Step that failed (`detect`, `copy`, `delete`, ...).
    pub operation: String,
    /// Error description.
    pub message: String,
}

impl PathError {
    /// Creates a path error.
    pub fn new(path: impl Into<String>, operation: impl Into<String>, message: impl ToString) -> Self {
        Self {
            path: path.into(),
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// Counters collected during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Paths in the local tree.
    pub local_entries: u64,
    /// Paths in the remote tree.
    pub remote_entries: u64,
    /// Planned actions.
    pub actions: u64,
    /// Files and symlinks copied.
    pub copied: u64,
    /// Bytes written by copies.
    pub bytes_copied: u64,
    /// Directories created.
    pub directories_created: u64,
    /// Renames applied.
    pub renamed: u64,
    /// Paths deleted.
    pub deleted: u64,
    /// Metadata-only updates.
    pub restamped: u64,
    /// Journal records refreshed without touching a replica.
    pub recorded: u64,
    /// Journal records dropped.
    pub forgotten: u64,
    /// Conflicts resolved by keeping both versions.
    pub conflicts: u64,
    /// Retried operations.
    pub retries: u64,
}

/// Everything a caller learns about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Overall status.
    pub status: RunStatus,
    /// Conflicts, in path order.
    pub conflicts: Vec<ConflictReport>,
    /// Per-path failures.
    pub errors: Vec<PathError>,
    /// Counters.
    pub stats: RunStats,
    /// Journal state at load time.
    pub journal_state: String,
    /// The run was cancelled before every action ran.
    pub cancelled: bool,
    /// Why the run could not proceed, for fatal runs.
    pub fatal: Option<String>,
    /// Wall-clock duration.
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl RunReport {
    /// Creates a report for a run that failed before propagation.
    pub fn fatal(message: impl Into<String>, journal_state: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Fatal,
            conflicts: Vec::new(),
            errors: Vec::new(),
            stats: RunStats::default(),
            journal_state: journal_state.into(),
            cancelled: false,
            fatal: Some(message.into()),
            duration: Duration::ZERO,
        }
    }

    /// Derives the status from what was collected.
    #[must_use]
    pub fn derive_status(&self) -> RunStatus {
        if self.fatal.is_some() {
            RunStatus::Fatal
        } else if self.cancelled || !self.errors.is_empty() {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Success
        }
    }
}

fn serialize_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
