//! Propagation.
//!
//! Applies an [`ActionPlan`] to both replicas, one action at a time, and
//! keeps the journal in step: a path's record is only written once its
//! action fully succeeded, and the journal is committed after every action
//! so an interrupted run leaves a valid base for the next one.

use crate::config::{RetryConfig, SyncConfig};
use crate::context::CancelHandle;
use crate::error::{ReplicaError, ReplicaResult, SyncError, SyncResult};
use crate::reconcile::{Action, ActionKind, ActionPlan, ConflictKind, Phase};
use crate::replica::{content_checksum, Replica};
use crate::report::{ConflictReport, PathError, RunStats};
use csync_core::{path, Checksum, ChecksumReader, EntryType, FileEntry, Journal, JournalRecord, Side};
use std::io;
use std::time::SystemTime;

/// Upper bound on `-<n>` suffixes tried for a conflict copy name.
const MAX_CONFLICT_SUFFIX: u32 = 1000;

/// Owner write permission bit.
const OWNER_WRITE: u32 = 0o200;

/// Owner read, write and search bits.
const OWNER_RWX: u32 = 0o700;

/// What propagation produced.
#[derive(Debug, Default)]
pub struct PropagationOutcome {
    /// Conflicts, in execution order.
    pub conflicts: Vec<ConflictReport>,
    /// Per-path failures.
    pub errors: Vec<PathError>,
    /// Counters.
    pub stats: RunStats,
    /// Propagation stopped early on request.
    pub cancelled: bool,
    /// Propagation stopped because a replica became unusable.
    pub fatal: Option<String>,
}

/// Directory metadata applied after every action ran.
#[derive(Debug)]
struct DeferredTimes {
    side: Side,
    path: String,
    mtime: i64,
    mode: u32,
}

/// Retries transient replica failures with backoff.
struct Retrier<'a> {
    config: &'a RetryConfig,
    retries: u64,
}

impl Retrier<'_> {
    fn run<T>(
        &mut self,
        operation: &str,
        path: &str,
        mut f: impl FnMut() -> ReplicaResult<T>,
    ) -> ReplicaResult<T> {
        let mut attempt = 0u32;
        loop {
            match f() {
                Err(e) if e.is_retryable() && attempt + 1 < self.config.max_attempts => {
                    attempt += 1;
                    self.retries += 1;
                    let delay = self.config.delay_for_attempt(attempt);
                    tracing::warn!(operation, path, attempt, ?delay, error = %e, "transient failure, retrying");
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }
}

/// Executes a plan against a pair of replicas.
pub struct Propagator<'a> {
    local: &'a dyn Replica,
    remote: &'a dyn Replica,
    journal: &'a mut Journal,
    retrier: Retrier<'a>,
    checksum_on_copy: bool,
    cancel: CancelHandle,
    now: i64,
    stats: RunStats,
    failed_dirs: Vec<String>,
    deferred: Vec<DeferredTimes>,
}

impl<'a> Propagator<'a> {
    /// Creates a propagator writing base versions to `journal`.
    pub fn new(
        local: &'a dyn Replica,
        remote: &'a dyn Replica,
        journal: &'a mut Journal,
        config: &'a SyncConfig,
    ) -> Self {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        Self {
            local,
            remote,
            journal,
            retrier: Retrier {
                config: &config.retry,
                retries: 0,
            },
            checksum_on_copy: config.checksum_on_copy,
            cancel: CancelHandle::new(),
            now,
            stats: RunStats::default(),
            failed_dirs: Vec::new(),
            deferred: Vec::new(),
        }
    }

    /// Uses `cancel` to stop between actions.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the timestamp used in conflict copy names.
    #[must_use]
    pub fn with_clock(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    fn replica(&self, side: Side) -> &'a dyn Replica {
        match side {
            Side::Local => self.local,
            Side::Remote => self.remote,
        }
    }

    /// Runs every action in plan order.
    pub fn run(mut self, plan: &ActionPlan) -> PropagationOutcome {
        let mut outcome = PropagationOutcome::default();
        tracing::info!(actions = plan.len(), "propagation started");

        for (index, action) in plan.actions().iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!(remaining = plan.len() - index, "propagation cancelled");
                outcome.cancelled = true;
                break;
            }

            if let Some(dir) = self.failed_dirs.iter().find(|d| path::is_ancestor(d, &action.path)) {
                outcome.errors.push(PathError::new(
                    &action.path,
                    action.kind.name(),
                    format!("parent directory {dir} could not be created"),
                ));
                continue;
            }

            tracing::debug!(
                path = %action.path,
                action = action.kind.name(),
                instruction = %action.instruction,
                "applying action"
            );
            match self.apply(action) {
                Ok(Some(conflict)) => outcome.conflicts.push(conflict),
                Ok(None) => {}
                Err(e) if e.is_fatal() => {
                    tracing::error!(path = %action.path, error = %e, "replica unusable, stopping");
                    outcome.fatal = Some(e.to_string());
                    break;
                }
                Err(e) => {
                    tracing::warn!(path = %action.path, action = action.kind.name(), error = %e, "action failed");
                    if action.phase() == Phase::Mkdir {
                        self.failed_dirs.push(action.path.clone());
                    }
                    outcome.errors.push(PathError::new(&action.path, action.kind.name(), &e));
                }
            }

            if self.journal.has_pending() {
                if let Err(e) = self.journal.commit() {
                    tracing::error!(path = %action.path, error = %e, "journal commit failed");
                    outcome.errors.push(PathError::new(&action.path, "journal commit", &e));
                }
            }
        }

        self.apply_deferred_times(&mut outcome);

        self.stats.retries = self.retrier.retries;
        self.stats.actions = plan.len() as u64;
        outcome.stats = self.stats;
        tracing::info!(
            copied = outcome.stats.copied,
            deleted = outcome.stats.deleted,
            renamed = outcome.stats.renamed,
            conflicts = outcome.conflicts.len(),
            errors = outcome.errors.len(),
            "propagation finished"
        );
        outcome
    }

    fn apply(&mut self, action: &Action) -> SyncResult<Option<ConflictReport>> {
        let path = action.path.as_str();
        match &action.kind {
            ActionKind::Mkdir { on } => self.mkdir(path, *on)?,
            ActionKind::Copy { from } => {
                let checksum = self.transfer(path, *from, action.entry(*from))?;
                self.record(path, checksum)?;
            }
            ActionKind::Replace { from } => self.replace(action, *from)?,
            ActionKind::Restamp { from } => self.restamp(action, *from)?,
            ActionKind::Conflict { kind } => return self.conflict(action, *kind),
            ActionKind::Rename { on, from } => self.rename(path, *on, from, action)?,
            ActionKind::Delete { on, recursive } => self.delete(action, *on, *recursive)?,
            ActionKind::Forget => {
                self.forget(path);
                self.stats.forgotten += 1;
            }
            ActionKind::Record => {
                let checksum = self.agreed_checksum(action)?;
                self.record(path, checksum)?;
                self.stats.recorded += 1;
            }
        }
        Ok(None)
    }

    /// Stats both replicas and stores the result as the new base.
    fn record(&mut self, path: &str, checksum: Option<Checksum>) -> SyncResult<()> {
        let (local, remote) = (self.local, self.remote);
        let l = self.retrier.run("stat", path, || local.stat(path))?;
        let r = self.retrier.run("stat", path, || remote.stat(path))?;
        if l.entry_type != r.entry_type {
            return Err(SyncError::SourceChanged { path: path.to_string() });
        }
        let checksum = if l.entry_type.is_dir() { None } else { checksum };
        self.journal.upsert(JournalRecord::from_entries(&l, &r, checksum));
        Ok(())
    }

    fn forget(&mut self, path: &str) {
        self.journal.remove(path);
        let below: Vec<String> = self.journal.descendants(path).map(|r| r.path.clone()).collect();
        for p in below {
            self.journal.remove(&p);
        }
    }

    /// Returns the current entry if it is still the version detection saw.
    fn unchanged_entry(
        &mut self,
        replica: &'a dyn Replica,
        path: &str,
        expected: Option<&FileEntry>,
    ) -> SyncResult<Option<FileEntry>> {
        match self.retrier.run("stat", path, || replica.stat(path)) {
            Ok(current) => match expected {
                Some(expected) if same_version(expected, &current) => Ok(Some(current)),
                _ => Err(SyncError::SourceChanged { path: path.to_string() }),
            },
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Creates missing ancestors of `path` on `side` and makes sure the
    /// directory `path` lands in accepts new entries.
    fn ensure_parents(&mut self, side: Side, path: &str) -> SyncResult<()> {
        let replica = self.replica(side);
        let ancestors: Vec<&str> = path::ancestors(path).collect();
        // Existing directory the next missing one is created in.
        let mut parent: Option<FileEntry> = None;
        for dir in ancestors.into_iter().rev() {
            match replica.stat(dir) {
                Ok(entry) if entry.entry_type.is_dir() => parent = Some(entry),
                Ok(_) => return Err(in_the_way(dir).into()),
                Err(e) if e.is_not_found() => {
                    if let Some(existing) = parent.take() {
                        self.unlock_dir(side, &existing)?;
                    }
                    self.retrier.run("mkdir", dir, || replica.mkdir(dir))?;
                    self.stats.directories_created += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        if let Some(existing) = parent {
            self.unlock_dir(side, &existing)?;
        }
        Ok(())
    }

    /// Makes the parent of `path` writable for the rest of the run.
    fn unlock_parent(&mut self, side: Side, path: &str) -> SyncResult<()> {
        let Some(parent) = path::parent(path) else {
            return Ok(());
        };
        let replica = self.replica(side);
        match self.retrier.run("stat", parent, || replica.stat(parent)) {
            Ok(entry) if entry.entry_type.is_dir() => self.unlock_dir(side, &entry),
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Grants the owner write access to a read-only directory and queues
    /// its current metadata for restoration at the end of the run.
    fn unlock_dir(&mut self, side: Side, dir: &FileEntry) -> SyncResult<()> {
        if dir.mode & OWNER_WRITE != 0 {
            return Ok(());
        }
        let replica = self.replica(side);
        let path = dir.path.as_str();
        self.retrier
            .run("set_times", path, || replica.set_times(path, dir.mtime, dir.mode | OWNER_RWX))?;
        tracing::debug!(side = %side, path, mode = %format!("{:o}", dir.mode), "read-only directory unlocked");
        if !self.deferred.iter().any(|d| d.side == side && d.path == path) {
            self.deferred.push(DeferredTimes {
                side,
                path: path.to_string(),
                mtime: dir.mtime,
                mode: dir.mode,
            });
        }
        Ok(())
    }

    /// Queues a directory's final mtime and mode, replacing anything queued
    /// for it before.
    fn defer_times(&mut self, side: Side, path: &str, mtime: i64, mode: u32) {
        match self.deferred.iter_mut().find(|d| d.side == side && d.path == path) {
            Some(queued) => {
                queued.mtime = mtime;
                queued.mode = mode;
            }
            None => self.deferred.push(DeferredTimes {
                side,
                path: path.to_string(),
                mtime,
                mode,
            }),
        }
    }

    /// Applies queued directory metadata, children before parents, so a
    /// read-only mode never blocks work below it and later writes cannot
    /// move a carried-over mtime.
    fn apply_deferred_times(&mut self, outcome: &mut PropagationOutcome) {
        let mut deferred = std::mem::take(&mut self.deferred);
        deferred.sort_by(|a, b| b.path.cmp(&a.path));
        for dir in deferred {
            let replica = self.replica(dir.side);
            let path = dir.path.as_str();
            let result = self
                .retrier
                .run("set_times", path, || replica.set_times(path, dir.mtime, dir.mode));
            match result {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::debug!(side = %dir.side, path, "directory removed during the run");
                }
                Err(e) => {
                    tracing::warn!(side = %dir.side, path, error = %e, "directory metadata not applied");
                    outcome.errors.push(PathError::new(path, "set_times", &e));
                }
            }
        }
    }

    /// Copies `path` from `from` to the other replica. Returns the content
    /// checksum for files and symlinks.
    fn transfer(&mut self, path: &str, from: Side, expected: Option<&FileEntry>) -> SyncResult<Option<Checksum>> {
        let src = self.replica(from);
        let dst = self.replica(from.other());

        let current = self.retrier.run("stat", path, || src.stat(path))?;
        if let Some(expected) = expected {
            if !same_version(expected, &current) {
                return Err(SyncError::SourceChanged { path: path.to_string() });
            }
        }
        self.ensure_parents(from.other(), path)?;

        match current.entry_type {
            EntryType::Directory => {
                match dst.stat(path) {
                    Ok(entry) if entry.entry_type.is_dir() => {}
                    Ok(_) => return Err(in_the_way(path).into()),
                    Err(e) if e.is_not_found() => {
                        self.retrier.run("mkdir", path, || dst.mkdir(path))?;
                        self.stats.directories_created += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
                self.defer_times(from.other(), path, current.mtime, current.mode);
                Ok(None)
            }
            EntryType::Symlink => {
                let target = self.retrier.run("read_link", path, || src.read_link(path))?;
                match dst.stat(path) {
                    Ok(_) => self.retrier.run("remove", path, || dst.remove(path))?,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
                self.retrier.run("symlink", path, || dst.symlink(&target, path))?;
                self.stats.copied += 1;
                Ok(Some(Checksum::of_bytes(target.as_bytes())))
            }
            EntryType::File => {
                let (written, checksum) = self.retrier.run("copy", path, || {
                    let mut reader = ChecksumReader::new(src.read(path)?);
                    let written = dst.write(path, &mut reader)?;
                    Ok((written, reader.finish()))
                })?;
                self.retrier
                    .run("set_times", path, || dst.set_times(path, current.mtime, current.mode))?;

                let after = self.retrier.run("stat", path, || src.stat(path))?;
                if !same_version(&current, &after) {
                    return Err(SyncError::SourceChanged { path: path.to_string() });
                }
                if self.checksum_on_copy {
                    let copied = self
                        .retrier
                        .run("verify", path, || content_checksum(dst, path, EntryType::File))?;
                    if copied != checksum {
                        return Err(SyncError::Verification { path: path.to_string() });
                    }
                }

                self.stats.copied += 1;
                self.stats.bytes_copied += written;
                Ok(Some(checksum))
            }
        }
    }

    fn mkdir(&mut self, path: &str, on: Side) -> SyncResult<()> {
        let dst = self.replica(on);
        let src = self.replica(on.other());

        let source = self.retrier.run("stat", path, || src.stat(path))?;
        if !source.entry_type.is_dir() {
            return Err(SyncError::SourceChanged { path: path.to_string() });
        }
        self.ensure_parents(on, path)?;
        match dst.stat(path) {
            Ok(entry) if entry.entry_type.is_dir() => {}
            Ok(_) => return Err(in_the_way(path).into()),
            Err(e) if e.is_not_found() => {
                self.retrier.run("mkdir", path, || dst.mkdir(path))?;
                self.stats.directories_created += 1;
            }
            Err(e) => return Err(e.into()),
        }
        self.defer_times(on, path, source.mtime, source.mode);
        self.record(path, None)
    }

    fn replace(&mut self, action: &Action, from: Side) -> SyncResult<()> {
        let path = action.path.as_str();
        let dst = self.replica(from.other());

        if let Some(existing) = self.unchanged_entry(dst, path, action.entry(from.other()))? {
            self.unlock_parent(from.other(), path)?;
            if existing.entry_type.is_dir() {
                self.retrier.run("remove_all", path, || dst.remove_all(path))?;
            } else {
                self.retrier.run("remove", path, || dst.remove(path))?;
            }
            self.forget(path);
        }
        let checksum = self.transfer(path, from, action.entry(from))?;
        self.record(path, checksum)
    }

    fn restamp(&mut self, action: &Action, from: Side) -> SyncResult<()> {
        let path = action.path.as_str();
        let src = self.replica(from);
        let dst = self.replica(from.other());

        let Some(source) = self.unchanged_entry(src, path, action.entry(from))? else {
            return Err(SyncError::SourceChanged { path: path.to_string() });
        };
        let Some(target) = self.unchanged_entry(dst, path, action.entry(from.other()))? else {
            return Err(SyncError::SourceChanged { path: path.to_string() });
        };
        if target.mode == source.mode && !dst.capabilities().settable_mtime {
            tracing::debug!(path, replica = %dst.describe(), "modification time not settable, keeping the destination's");
        } else {
            self.retrier
                .run("set_times", path, || dst.set_times(path, source.mtime, source.mode))?;
            self.stats.restamped += 1;
        }

        let checksum = action
            .entry(from)
            .and_then(|e| e.checksum)
            .or_else(|| action.base.as_ref().and_then(|b| b.checksum));
        self.record(path, checksum)
    }

    fn rename(&mut self, path: &str, on: Side, from: &str, action: &Action) -> SyncResult<()> {
        let dst = self.replica(on);

        if let Some(base) = self.journal.lookup(from).cloned() {
            let current = self.retrier.run("stat", from, || dst.stat(from))?;
            if current.size != base.size || current.mtime != base.stamp(on).mtime {
                return Err(SyncError::SourceChanged { path: from.to_string() });
            }
        }
        let checksum = action
            .entry(on.other())
            .and_then(|e| e.checksum)
            .or_else(|| self.journal.lookup(from).and_then(|r| r.checksum));

        self.unlock_parent(on, from)?;
        self.ensure_parents(on, path)?;
        self.retrier.run("rename", from, || dst.rename(from, path))?;
        self.journal.remove(from);
        self.stats.renamed += 1;
        self.record(path, checksum)
    }

    fn delete(&mut self, action: &Action, on: Side, recursive: bool) -> SyncResult<()> {
        let path = action.path.as_str();
        let dst = self.replica(on);

        if let Some(current) = self.unchanged_entry(dst, path, action.entry(on))? {
            self.unlock_parent(on, path)?;
            if current.entry_type.is_dir() && recursive {
                self.retrier.run("remove_all", path, || dst.remove_all(path))?;
            } else {
                self.retrier.run("remove", path, || dst.remove(path))?;
            }
            self.stats.deleted += 1;
        }
        self.forget(path);
        Ok(())
    }

    /// Checksum both replicas agree on, for journal-only updates.
    fn agreed_checksum(&mut self, action: &Action) -> SyncResult<Option<Checksum>> {
        let Some(local) = action.local.as_ref() else {
            return Ok(None);
        };
        if local.entry_type.is_dir() {
            return Ok(None);
        }
        if let Some(sum) = local.checksum.or(action.remote.as_ref().and_then(|r| r.checksum)) {
            return Ok(Some(sum));
        }
        let replica = self.local;
        let path = action.path.as_str();
        let sum = self
            .retrier
            .run("checksum", path, || content_checksum(replica, path, local.entry_type))?;
        Ok(Some(sum))
    }

    fn conflict(&mut self, action: &Action, kind: ConflictKind) -> SyncResult<Option<ConflictReport>> {
        let path = action.path.as_str();
        match kind {
            ConflictKind::DeletedOn(side) => {
                let changed = side.other();
                let checksum = self.transfer(path, changed, action.entry(changed))?;
                self.record(path, checksum)?;
                self.stats.conflicts += 1;
                tracing::warn!(path, deleted_on = %side, "changed path was deleted on the other replica, restored it");
                Ok(Some(ConflictReport {
                    path: path.to_string(),
                    kind,
                    aside: None,
                }))
            }
            ConflictKind::BothModified => self.both_modified(action),
        }
    }

    fn both_modified(&mut self, action: &Action) -> SyncResult<Option<ConflictReport>> {
        let path = action.path.as_str();
        let (Some(l), Some(r)) = (action.local.as_ref(), action.remote.as_ref()) else {
            return Err(SyncError::SourceChanged { path: path.to_string() });
        };

        if l.entry_type.is_dir() && r.entry_type.is_dir() {
            self.record(path, None)?;
            self.stats.recorded += 1;
            return Ok(None);
        }
        if l.entry_type == r.entry_type {
            let (local, remote) = (self.local, self.remote);
            let ls = self
                .retrier
                .run("checksum", path, || content_checksum(local, path, l.entry_type))?;
            let rs = self
                .retrier
                .run("checksum", path, || content_checksum(remote, path, r.entry_type))?;
            if ls == rs {
                tracing::debug!(path, "both replicas hold identical content");
                self.record(path, Some(ls))?;
                self.stats.recorded += 1;
                return Ok(None);
            }
        }

        // The side holding a non-directory steps aside.
        let aside_side = if l.entry_type.is_dir() { Side::Remote } else { Side::Local };
        let keeper = aside_side.other();
        let aside = self.conflict_name(path)?;
        let moving = self.replica(aside_side);

        if self.unchanged_entry(moving, path, action.entry(aside_side))?.is_none() {
            return Err(SyncError::SourceChanged { path: path.to_string() });
        }
        self.unlock_parent(aside_side, path)?;
        self.retrier.run("rename", path, || moving.rename(path, &aside))?;
        let aside_sum = self.transfer(&aside, aside_side, None)?;
        self.record(&aside, aside_sum)?;

        let checksum = self.transfer(path, keeper, action.entry(keeper))?;
        self.record(path, checksum)?;

        self.stats.conflicts += 1;
        tracing::warn!(path, aside = %aside, "both replicas changed the path, kept both versions");
        Ok(Some(ConflictReport {
            path: path.to_string(),
            kind: ConflictKind::BothModified,
            aside: Some(aside),
        }))
    }

    /// First `<stem>.conflict-<now>[-n][.ext]` name free on both replicas.
    fn conflict_name(&mut self, path: &str) -> SyncResult<String> {
        let name = path::file_name(path);
        let (stem, ext) = split_extension(name);
        let parent = path::parent(path).unwrap_or("");

        for n in 0..MAX_CONFLICT_SUFFIX {
            let candidate = if n == 0 {
                path::join(parent, &format!("{stem}.conflict-{}{ext}", self.now))
            } else {
                path::join(parent, &format!("{stem}.conflict-{}-{n}{ext}", self.now))
            };
            if !self.taken(self.local, &candidate)? && !self.taken(self.remote, &candidate)? {
                return Ok(candidate);
            }
        }
        Err(in_the_way(path).into())
    }

    fn taken(&mut self, replica: &'a dyn Replica, path: &str) -> SyncResult<bool> {
        match self.retrier.run("stat", path, || replica.stat(path)) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Same object as far as metadata can tell.
fn same_version(a: &FileEntry, b: &FileEntry) -> bool {
    a.entry_type == b.entry_type && (a.entry_type.is_dir() || (a.size == b.size && a.mtime == b.mtime))
}

fn in_the_way(path: &str) -> ReplicaError {
    ReplicaError::io(
        path,
        io::Error::new(io::ErrorKind::AlreadyExists, "another object is in the way"),
    )
}

/// Splits `name` into stem and extension (with its dot). Leading dots do
/// not start an extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::detect;
    use crate::reconcile::reconcile;
    use crate::replica::{FaultOp, MemoryReplica};
    use csync_core::ExcludeSet;

    struct Pair {
        local: MemoryReplica,
        remote: MemoryReplica,
        journal: Journal,
        config: SyncConfig,
    }

    impl Pair {
        fn new() -> Self {
            Self {
                local: MemoryReplica::new("local").with_device(1),
                remote: MemoryReplica::new("remote").with_device(2),
                journal: Journal::open_in_memory().unwrap(),
                config: SyncConfig::new().with_retry(RetryConfig::new(3).with_initial_delay(std::time::Duration::ZERO)),
            }
        }

        fn plan(&self) -> ActionPlan {
            let excludes = ExcludeSet::new();
            let l = detect(&self.local, Side::Local, &self.journal, &excludes, &self.config.detect).unwrap();
            let r = detect(&self.remote, Side::Remote, &self.journal, &excludes, &self.config.detect).unwrap();
            reconcile(&l, &r)
        }

        fn sync(&mut self) -> PropagationOutcome {
            let plan = self.plan();
            Propagator::new(&self.local, &self.remote, &mut self.journal, &self.config)
                .with_clock(1_234)
                .run(&plan)
        }
    }

    #[test]
    fn split_extension_cases() {
        assert_eq!(split_extension("report.txt"), ("report", ".txt"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension(".bashrc"), (".bashrc", ""));
        assert_eq!(split_extension("Makefile"), ("Makefile", ""));
    }

    #[test]
    fn copy_records_both_stamps() {
        let mut pair = Pair::new();
        pair.local.put_file("docs/a.txt", "hello", 1_000);

        let outcome = pair.sync();
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        assert_eq!(pair.remote.content("docs/a.txt").unwrap(), b"hello");
        assert_eq!(pair.remote.entry("docs/a.txt").unwrap().mtime, 1_000);

        let record = pair.journal.lookup("docs/a.txt").unwrap();
        assert_eq!(record.checksum, Some(Checksum::of_bytes(b"hello")));
        assert_eq!(record.stamp(Side::Remote).identity().map(|(_, dev)| dev), Some(2));
        assert!(pair.journal.lookup("docs").is_some());
    }

    #[test]
    fn transient_write_failure_is_retried() {
        let mut pair = Pair::new();
        pair.local.put_file("a.txt", "data", 1_000);
        pair.remote
            .inject_fault(FaultOp::Write, "a.txt", io::ErrorKind::Interrupted, Some(2));

        let outcome = pair.sync();
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.stats.retries, 2);
        assert_eq!(pair.remote.content("a.txt").unwrap(), b"data");
    }

    #[test]
    fn permanent_failure_leaves_journal_untouched() {
        let mut pair = Pair::new();
        pair.local.put_file("a.txt", "data", 1_000);
        pair.local.put_file("b.txt", "more", 1_000);
        pair.remote
            .inject_fault(FaultOp::Write, "a.txt", io::ErrorKind::PermissionDenied, None);

        let outcome = pair.sync();
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].path, "a.txt");
        assert!(pair.journal.lookup("a.txt").is_none());
        assert!(pair.journal.lookup("b.txt").is_some());
        assert_eq!(pair.remote.content("b.txt").unwrap(), b"more");
    }

    #[test]
    fn failed_mkdir_skips_children() {
        let mut pair = Pair::new();
        pair.local.put_file("d/x", "1", 1_000);
        pair.remote
            .inject_fault(FaultOp::Mkdir, "d", io::ErrorKind::PermissionDenied, None);

        let outcome = pair.sync();
        let failed: Vec<&str> = outcome.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(failed, vec!["d", "d/x"]);
        assert!(pair.journal.is_empty());
    }

    #[test]
    fn edit_edit_conflict_keeps_both_versions() {
        let mut pair = Pair::new();
        pair.local.put_file("notes.txt", "base", 1_000);
        pair.sync();

        pair.local.edit_file("notes.txt", "local edit", 2_000);
        pair.remote.edit_file("notes.txt", "remote edit", 2_001);
        let outcome = pair.sync();

        assert_eq!(outcome.conflicts.len(), 1);
        let aside = outcome.conflicts[0].aside.clone().unwrap();
        assert_eq!(aside, "notes.conflict-1234.txt");
        for replica in [&pair.local, &pair.remote] {
            assert_eq!(replica.content("notes.txt").unwrap(), b"remote edit");
            assert_eq!(replica.content(&aside).unwrap(), b"local edit");
        }

        let again = pair.sync();
        assert!(again.conflicts.is_empty());
        assert_eq!(again.stats.actions, 0);
    }

    #[test]
    fn identical_edits_are_not_conflicts() {
        let mut pair = Pair::new();
        pair.local.put_file("same.txt", "v1", 1_000);
        pair.sync();

        pair.local.edit_file("same.txt", "version 2", 2_000);
        pair.remote.edit_file("same.txt", "version 2", 2_005);
        let outcome = pair.sync();
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.stats.recorded, 1);
        assert_eq!(
            pair.journal.lookup("same.txt").unwrap().checksum,
            Some(Checksum::of_bytes(b"version 2"))
        );
    }

    #[test]
    fn delete_skips_changed_destination() {
        let mut pair = Pair::new();
        pair.local.put_file("a.txt", "base", 1_000);
        pair.sync();

        pair.local.delete("a.txt");
        let plan = pair.plan();
        // The remote copy changes after detection.
        pair.remote.edit_file("a.txt", "late edit", 3_000);
        let outcome = Propagator::new(&pair.local, &pair.remote, &mut pair.journal, &pair.config).run(&plan);

        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(pair.remote.content("a.txt").unwrap(), b"late edit");
        assert!(pair.journal.lookup("a.txt").is_some());
    }

    #[test]
    fn read_only_source_directory_gets_its_mode_last() {
        let mut pair = Pair::new();
        pair.local.put_file("ro/inner.txt", "x", 1_000);
        pair.local.put_file("ro/deep/leaf.txt", "y", 1_000);
        pair.local.chmod("ro", 0o555);
        pair.local.touch("ro", 900);

        let outcome = pair.sync();
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        assert_eq!(pair.remote.content("ro/inner.txt").unwrap(), b"x");
        assert_eq!(pair.remote.content("ro/deep/leaf.txt").unwrap(), b"y");
        let dir = pair.remote.entry("ro").unwrap();
        assert_eq!(dir.mode, 0o555);
        assert_eq!(dir.mtime, 900);

        assert_eq!(pair.sync().stats.actions, 0);
    }

    #[test]
    fn read_only_destination_directory_accepts_changes_and_stays_read_only() {
        let mut pair = Pair::new();
        pair.local.put_file("ro/old.txt", "1", 1_000);
        pair.sync();
        pair.local.chmod("ro", 0o555);
        pair.remote.chmod("ro", 0o555);
        let before = pair.remote.entry("ro").unwrap();

        pair.local.put_file("ro/new.txt", "2", 1_100);
        pair.local.delete("ro/old.txt");
        let outcome = pair.sync();

        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        assert_eq!(pair.remote.content("ro/new.txt").unwrap(), b"2");
        assert!(!pair.remote.exists("ro/old.txt"));
        let after = pair.remote.entry("ro").unwrap();
        assert_eq!(after.mode, 0o555);
        assert_eq!(after.mtime, before.mtime);
    }

    #[test]
    fn restamp_skips_unsettable_mtime() {
        let mut pair = Pair::new();
        pair.remote = MemoryReplica::new("remote").with_device(2).with_settable_mtime(false);
        pair.local.put_file("a.txt", "same", 1_000);
        pair.sync();

        pair.local.touch("a.txt", 2_000);
        pair.remote
            .inject_fault(FaultOp::SetTimes, "a.txt", io::ErrorKind::PermissionDenied, None);
        let outcome = pair.sync();

        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        assert_eq!(outcome.stats.restamped, 0);
        assert_eq!(pair.journal.lookup("a.txt").unwrap().stamp(Side::Local).mtime, 2_000);
        assert_eq!(pair.sync().stats.actions, 0);
    }

    #[test]
    fn cancelled_before_start_does_nothing() {
        let mut pair = Pair::new();
        pair.local.put_file("a.txt", "x", 1_000);
        let plan = pair.plan();
        let cancel = CancelHandle::new();
        cancel.cancel();

        let outcome = Propagator::new(&pair.local, &pair.remote, &mut pair.journal, &pair.config)
            .with_cancel(cancel)
            .run(&plan);
        assert!(outcome.cancelled);
        assert!(!pair.remote.exists("a.txt"));
    }
}
