//! The journal: base versions of previously synced paths.
//!
//! The journal is an append-only log of CRC-framed entries (see [`frame`]).
//! Loading replays the log into an in-memory map. Changes made during a run
//! are queued and become durable on [`Journal::commit`], which the
//! propagator calls after every completed path.
//!
//! ## Recovery
//!
//! - An incomplete trailing frame (crash during append) is truncated away
//!   and the journal reports [`JournalState::Recovered`].
//! - Any other damage (bad magic, CRC mismatch, undecodable record) is
//!   never fatal: the journal starts empty in [`JournalState::Degraded`]
//!   and the first commit replaces the whole log with a fresh generation.
//!   Update detection then treats every path as new on both sides.

pub mod frame;
mod record;

pub use record::JournalRecord;

use crate::error::{CoreError, CoreResult};
use crate::path;
use csync_storage::{FileLog, LogBackend, MemoryLog};
use frame::Frame;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// How the journal came to be in its current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalState {
    /// No log existed; this is the first run.
    Fresh,
    /// The log replayed cleanly.
    Loaded,
    /// An incomplete trailing frame was dropped.
    Recovered {
        /// Number of bytes truncated.
        dropped_bytes: u64,
    },
    /// The log was unreadable and has been discarded.
    Degraded {
        /// Why the log was discarded.
        reason: String,
    },
}

impl JournalState {
    /// Returns true if the journal content was discarded.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, JournalState::Degraded { .. })
    }
}

impl fmt::Display for JournalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalState::Fresh => f.write_str("fresh"),
            JournalState::Loaded => f.write_str("loaded"),
            JournalState::Recovered { dropped_bytes } => {
                write!(f, "recovered ({dropped_bytes} torn bytes dropped)")
            }
            JournalState::Degraded { reason } => write!(f, "degraded ({reason})"),
        }
    }
}

/// Persistent store of [`JournalRecord`]s keyed by path.
pub struct Journal {
    backend: Box<dyn LogBackend>,
    records: BTreeMap<String, JournalRecord>,
    pending: Vec<Frame>,
    generation: u64,
    state: JournalState,
    rewrite_on_commit: bool,
}

impl Journal {
    /// Opens the journal file at `path`, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error only if the file cannot be opened or read.
    /// Corruption degrades the journal instead of failing.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let log = FileLog::open_with_create_dirs(path)?;
        tracing::debug!(path = %path.display(), "opening journal");
        Self::with_backend(Box::new(log))
    }

    /// Opens a journal kept only in memory.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches [`Journal::open`].
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::with_backend(Box::new(MemoryLog::new()))
    }

    /// Opens a journal on an arbitrary log backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or the torn tail
    /// cannot be truncated.
    pub fn with_backend(backend: Box<dyn LogBackend>) -> CoreResult<Self> {
        let bytes = backend.read_all()?;

        let mut journal = Self {
            backend,
            records: BTreeMap::new(),
            pending: Vec::new(),
            generation: 0,
            state: JournalState::Fresh,
            rewrite_on_commit: false,
        };

        if bytes.is_empty() {
            tracing::info!("journal is empty, starting fresh");
            return Ok(journal);
        }

        let loaded = frame::replay(&bytes).and_then(|replay| {
            let frame::Replay {
                frames,
                valid_len,
                torn_tail,
            } = replay;
            journal.apply(frames).map(|()| (valid_len, torn_tail))
        });

        match loaded {
            Ok((valid_len, torn_tail)) => {
                if torn_tail > 0 {
                    tracing::warn!(
                        dropped_bytes = torn_tail,
                        "journal ends in an incomplete frame, truncating"
                    );
                    journal.backend.truncate(valid_len)?;
                    journal.backend.sync()?;
                    journal.state = JournalState::Recovered {
                        dropped_bytes: torn_tail,
                    };
                } else {
                    journal.state = JournalState::Loaded;
                }
                tracing::info!(
                    records = journal.records.len(),
                    generation = journal.generation,
                    "journal loaded"
                );
            }
            Err(err) if err.is_corruption() => {
                tracing::warn!(error = %err, "journal is corrupt, discarding it");
                journal.records.clear();
                journal.generation = 0;
                journal.rewrite_on_commit = true;
                journal.state = JournalState::Degraded {
                    reason: err.to_string(),
                };
            }
            Err(err) => return Err(err),
        }

        Ok(journal)
    }

    fn apply(&mut self, frames: Vec<Frame>) -> CoreResult<()> {
        let mut frames = frames.into_iter();
        match frames.next() {
            Some(Frame::Generation(generation)) => self.generation = generation,
            Some(_) => {
                return Err(CoreError::journal_corruption(
                    0,
                    "log does not start with a generation header",
                ))
            }
            None => return Ok(()),
        }

        for frame in frames {
            match frame {
                Frame::Generation(generation) => {
                    self.records.clear();
                    self.generation = generation;
                }
                Frame::Upsert(record) => {
                    self.records.insert(record.path.clone(), record);
                }
                Frame::Remove(path) => {
                    self.records.remove(&path);
                }
            }
        }
        Ok(())
    }

    /// Returns the load state.
    #[must_use]
    pub fn state(&self) -> &JournalState {
        &self.state
    }

    /// Returns the current generation (0 before the first commit).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the record for `path`.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&JournalRecord> {
        self.records.get(path)
    }

    /// Iterates over all records in path order.
    pub fn records(&self) -> impl Iterator<Item = &JournalRecord> {
        self.records.values()
    }

    /// Iterates over the records strictly below `dir`.
    pub fn descendants<'a>(&'a self, dir: &str) -> impl Iterator<Item = &'a JournalRecord> + 'a {
        let (start, end) = path::descendant_range(dir);
        self.records.range(start..end).map(|(_, record)| record)
    }

    /// Returns a copy of all records keyed by path.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, JournalRecord> {
        self.records.clone()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns true if changes are queued but not committed.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.rewrite_on_commit
    }

    /// Inserts or replaces the record for `record.path`.
    pub fn upsert(&mut self, record: JournalRecord) {
        self.records.insert(record.path.clone(), record.clone());
        self.pending.push(Frame::Upsert(record));
    }

    /// Removes the record for `path`, returning it.
    pub fn remove(&mut self, path: &str) -> Option<JournalRecord> {
        let removed = self.records.remove(path);
        if removed.is_some() {
            self.pending.push(Frame::Remove(path.to_string()));
        }
        removed
    }

    /// Makes every queued change durable.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the log write fails. Queued changes
    /// stay queued on failure.
    pub fn commit(&mut self) -> CoreResult<()> {
        if self.rewrite_on_commit {
            return self.compact();
        }
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut data = Vec::new();
        let mut generation = self.generation;
        if self.backend.size()? == 0 {
            generation = generation.max(1);
            data.extend(Frame::Generation(generation).encode()?);
        }
        for frame in &self.pending {
            data.extend(frame.encode()?);
        }

        self.backend.append(&data)?;
        self.backend.sync()?;

        tracing::trace!(frames = self.pending.len(), bytes = data.len(), "journal commit");
        self.generation = generation;
        self.pending.clear();
        Ok(())
    }

    /// Replaces the log with a new generation holding only live records.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the atomic replace fails.
    pub fn compact(&mut self) -> CoreResult<()> {
        let generation = self.generation + 1;

        let mut data = Frame::Generation(generation).encode()?;
        for record in self.records.values() {
            data.extend(Frame::Upsert(record.clone()).encode()?);
        }

        self.backend.replace(&data)?;

        tracing::debug!(
            generation,
            records = self.records.len(),
            bytes = data.len(),
            "journal compacted"
        );
        self.generation = generation;
        self.pending.clear();
        self.rewrite_on_commit = false;
        Ok(())
    }
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal")
            .field("records", &self.records.len())
            .field("pending", &self.pending.len())
            .field("generation", &self.generation)
            .field("state", &self.state)
            .finish()
    }
}
