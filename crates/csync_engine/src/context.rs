//! Sync context: the lifecycle of one replica pair.
//!
//! `create → init → update → reconcile → propagate → destroy`, or all of
//! the middle steps at once through [`SyncContext::run`]. Steps called out
//! of order fail with [`SyncError::InvalidStateTransition`]. A context can
//! run again after propagation; the journal carries over.

use crate::config::SyncConfig;
use crate::detect::detect;
use crate::error::{SyncError, SyncResult};
use crate::propagate::Propagator;
use crate::reconcile::{reconcile, ActionPlan};
use crate::replica::Replica;
use crate::report::{PathError, RunReport, RunStatus};
use csync_core::{ConfigDir, ExcludeSet, FileTree, Instruction, Journal, RunLock, Side};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Lifecycle state of a [`SyncContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Created; configuration can still change.
    Created,
    /// Lock held, configuration and journal loaded.
    Initialized,
    /// Both replicas scanned.
    Updated,
    /// Action plan built.
    Reconciled,
    /// Plan applied; ready for another run.
    Propagated,
    /// A fatal error stopped the context.
    Failed,
}

/// Shared flag that stops a run between actions.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Creates a handle that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears the flag.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One local/remote replica pair and everything a run needs.
pub struct SyncContext {
    local: Arc<dyn Replica>,
    remote: Arc<dyn Replica>,
    config: SyncConfig,
    config_dir: ConfigDir,
    excludes: ExcludeSet,
    journal: Option<Journal>,
    lock: Option<RunLock>,
    state: ContextState,
    cancel: CancelHandle,
    trees: Option<(FileTree, FileTree)>,
    plan: Option<ActionPlan>,
    status: Option<RunStatus>,
    started: Option<Instant>,
}

impl SyncContext {
    /// Creates a context for `local` and `remote`.
    ///
    /// # Errors
    ///
    /// Fails when no configuration directory is configured and no home
    /// directory can be found.
    pub fn create(local: Arc<dyn Replica>, remote: Arc<dyn Replica>, config: SyncConfig) -> SyncResult<Self> {
        let dir = match &config.config_dir {
            Some(dir) => dir.clone(),
            None => ConfigDir::default_location()
                .ok_or_else(|| SyncError::Fatal("no home directory for the configuration directory".into()))?,
        };
        tracing::debug!(
            local = %local.describe(),
            remote = %remote.describe(),
            config_dir = %dir.display(),
            "sync context created"
        );
        Ok(Self {
            local,
            remote,
            config,
            config_dir: ConfigDir::new(dir),
            excludes: ExcludeSet::new(),
            journal: None,
            lock: None,
            state: ContextState::Created,
            cancel: CancelHandle::new(),
            trees: None,
            plan: None,
            status: None,
            started: None,
        })
    }

    fn expect_state(&self, allowed: &[ContextState], step: &str) -> SyncResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state),
                to: step.into(),
            })
        }
    }

    fn fail(&mut self, error: SyncError) -> SyncError {
        tracing::error!(error = %error, "sync context failed");
        self.state = ContextState::Failed;
        error
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Status of the last completed run.
    pub fn status(&self) -> Option<RunStatus> {
        self.status
    }

    /// Handle that cancels the current or next run. The flag clears once
    /// that run finished propagating.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// The configuration in effect (after `csync.conf` was applied).
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The journal, once initialized.
    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }

    /// The plan built by the last `reconcile`.
    pub fn plan(&self) -> Option<&ActionPlan> {
        self.plan.as_ref()
    }

    /// Effective exclude rules.
    pub fn excludes(&self) -> &ExcludeSet {
        &self.excludes
    }

    /// Configuration directory path.
    pub fn config_dir(&self) -> &Path {
        self.config_dir.path()
    }

    /// Moves the configuration directory. Only before `init`.
    ///
    /// # Errors
    ///
    /// Fails after `init`.
    pub fn set_config_dir(&mut self, dir: impl Into<PathBuf>) -> SyncResult<()> {
        self.expect_state(&[ContextState::Created], "set_config_dir")?;
        self.config_dir = ConfigDir::new(dir);
        Ok(())
    }

    /// Deletes the configuration directory, journal included. Only before
    /// `init`.
    ///
    /// # Errors
    ///
    /// Fails after `init` or if the directory cannot be removed.
    pub fn remove_config_dir(&mut self) -> SyncResult<()> {
        self.expect_state(&[ContextState::Created], "remove_config_dir")?;
        tracing::info!(path = %self.config_dir.path().display(), "removing configuration directory");
        self.config_dir.remove()?;
        Ok(())
    }

    /// Adds the patterns in `path` to the exclude rules.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or holds an invalid pattern.
    pub fn add_exclude_list(&mut self, path: impl AsRef<Path>) -> SyncResult<()> {
        self.expect_state(&[ContextState::Created, ContextState::Initialized], "add_exclude_list")?;
        self.excludes.load_file(path.as_ref())?;
        Ok(())
    }

    /// Takes the run lock and loads configuration, excludes and journal.
    ///
    /// # Errors
    ///
    /// Fails (and leaves the context `Failed`) if the lock is held
    /// elsewhere, `csync.conf` is invalid or the journal cannot be opened.
    pub fn init(&mut self) -> SyncResult<()> {
        self.expect_state(&[ContextState::Created], "init")?;
        match self.load() {
            Ok(()) => {
                self.state = ContextState::Initialized;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn load(&mut self) -> SyncResult<()> {
        self.config_dir.create()?;
        let lock = RunLock::acquire(&self.config_dir.lock_file())?;

        let file = self.config_dir.load_config()?;
        self.config.apply_file(&file);

        let exclude_file = self.config_dir.exclude_file();
        if exclude_file.is_file() {
            self.excludes.load_file(&exclude_file)?;
        }

        let journal = Journal::open(&self.config_dir.journal_file())
            .map_err(|e| SyncError::Fatal(format!("cannot open journal: {e}")))?;
        if journal.state().is_degraded() {
            tracing::warn!(state = %journal.state(), "journal unusable, every path is treated as new");
        }
        tracing::info!(
            config_dir = %self.config_dir.path().display(),
            records = journal.len(),
            journal = %journal.state(),
            "sync context initialized"
        );

        self.journal = Some(journal);
        self.lock = Some(lock);
        Ok(())
    }

    /// Scans both replicas in parallel and classifies every path.
    ///
    /// # Errors
    ///
    /// Fails (and leaves the context `Failed`) if either replica cannot be
    /// listed.
    pub fn update(&mut self) -> SyncResult<()> {
        self.expect_state(&[ContextState::Initialized, ContextState::Propagated], "update")?;
        self.started = Some(Instant::now());
        self.plan = None;

        let Some(journal) = self.journal.as_ref() else {
            return Err(self.fail(SyncError::Fatal("journal not loaded".into())));
        };
        let (local, remote) = (self.local.as_ref(), self.remote.as_ref());
        let (excludes, options) = (&self.excludes, &self.config.detect);

        let (local_tree, remote_tree) = std::thread::scope(|s| {
            let local_scan = s.spawn(|| detect(local, Side::Local, journal, excludes, options));
            let remote_tree = detect(remote, Side::Remote, journal, excludes, options);
            let local_tree = local_scan
                .join()
                .unwrap_or_else(|_| Err(SyncError::Fatal("local detection panicked".into())));
            (local_tree, remote_tree)
        });

        match (local_tree, remote_tree) {
            (Ok(l), Ok(r)) => {
                self.trees = Some((l, r));
                self.state = ContextState::Updated;
                Ok(())
            }
            (Err(e), _) | (_, Err(e)) => Err(self.fail(SyncError::Fatal(e.to_string()))),
        }
    }

    /// Merges the two scans into an action plan.
    ///
    /// # Errors
    ///
    /// Fails if called before `update`.
    pub fn reconcile(&mut self) -> SyncResult<&ActionPlan> {
        self.expect_state(&[ContextState::Updated], "reconcile")?;
        let Some((local, remote)) = self.trees.as_ref() else {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state),
                to: "reconcile".into(),
            });
        };
        let plan = reconcile(local, remote);
        self.state = ContextState::Reconciled;
        Ok(self.plan.insert(plan))
    }

    /// Applies the plan and reports the run.
    ///
    /// # Errors
    ///
    /// Fails if called before `reconcile`. Problems during propagation are
    /// part of the report, not errors.
    pub fn propagate(&mut self) -> SyncResult<RunReport> {
        self.expect_state(&[ContextState::Reconciled], "propagate")?;
        let (Some(plan), Some(journal), Some((local_tree, remote_tree))) =
            (self.plan.as_ref(), self.journal.as_mut(), self.trees.as_ref())
        else {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state),
                to: "propagate".into(),
            });
        };

        let outcome = Propagator::new(self.local.as_ref(), self.remote.as_ref(), journal, &self.config)
            .with_cancel(self.cancel.clone())
            .run(plan);
        // A cancel request covers one run.
        self.cancel.reset();

        let mut errors = detection_errors(plan, local_tree, remote_tree);
        errors.extend(outcome.errors);

        let mut stats = outcome.stats;
        stats.local_entries = local_tree.len() as u64;
        stats.remote_entries = remote_tree.len() as u64;

        let mut report = RunReport {
            status: RunStatus::Success,
            conflicts: outcome.conflicts,
            errors,
            stats,
            journal_state: journal.state().to_string(),
            cancelled: outcome.cancelled,
            fatal: outcome.fatal,
            duration: self.started.map(|t| t.elapsed()).unwrap_or_default(),
        };
        report.status = report.derive_status();

        self.trees = None;
        self.state = if report.status == RunStatus::Fatal {
            ContextState::Failed
        } else {
            ContextState::Propagated
        };
        self.status = Some(report.status);
        tracing::info!(
            status = %report.status,
            conflicts = report.conflicts.len(),
            errors = report.errors.len(),
            "sync run finished"
        );
        Ok(report)
    }

    /// Runs every step up to propagation. Never fails: problems that stop
    /// the run produce a [`RunStatus::Fatal`] report.
    pub fn run(&mut self) -> RunReport {
        let started = Instant::now();
        match self.run_steps() {
            Ok(report) => report,
            Err(e) => {
                let journal_state = self
                    .journal
                    .as_ref()
                    .map_or_else(|| "not loaded".to_string(), |j| j.state().to_string());
                let mut report = RunReport::fatal(e.to_string(), journal_state);
                report.duration = started.elapsed();
                self.status = Some(RunStatus::Fatal);
                report
            }
        }
    }

    fn run_steps(&mut self) -> SyncResult<RunReport> {
        if self.state == ContextState::Created {
            self.init()?;
        }
        self.update()?;
        self.reconcile()?;
        self.propagate()
    }

    /// Writes back the journal and releases the lock.
    ///
    /// # Errors
    ///
    /// Fails if the journal cannot be written.
    pub fn destroy(mut self) -> SyncResult<()> {
        if let Some(journal) = self.journal.as_mut() {
            journal.commit()?;
            journal.compact()?;
        }
        self.lock = None;
        tracing::debug!(path = %self.config_dir.path().display(), "sync context destroyed");
        Ok(())
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("local", &self.local.describe())
            .field("remote", &self.remote.describe())
            .field("config_dir", &self.config_dir.path())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Paths that failed detection, plus type changes the plan refused.
fn detection_errors(plan: &ActionPlan, local: &FileTree, remote: &FileTree) -> Vec<PathError> {
    let mut errors = Vec::new();
    for (path, instruction) in plan.instructions() {
        if *instruction != Instruction::Error {
            continue;
        }
        let failed = [local.get(path), remote.get(path)]
            .into_iter()
            .flatten()
            .find_map(|node| node.error.as_deref());
        if let Some(message) = failed {
            errors.push(PathError::new(path, "detect", message));
            continue;
        }
        let inherited = csync_core::path::ancestors(path)
            .any(|a| plan.instruction(a) == Some(Instruction::Error));
        if !inherited {
            errors.push(PathError::new(
                path,
                "reconcile",
                "type change would discard changed content below",
            ));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::MemoryReplica;
    use tempfile::tempdir;

    fn context(dir: &Path) -> (Arc<MemoryReplica>, Arc<MemoryReplica>, SyncContext) {
        let local = Arc::new(MemoryReplica::new("local").with_device(1));
        let remote = Arc::new(MemoryReplica::new("remote").with_device(2));
        let ctx = SyncContext::create(
            local.clone(),
            remote.clone(),
            SyncConfig::new().with_config_dir(dir),
        )
        .unwrap();
        (local, remote, ctx)
    }

    #[test]
    fn steps_in_order() {
        let dir = tempdir().unwrap();
        let (local, remote, mut ctx) = context(dir.path());
        local.put_file("a.txt", "hello", 1_000);

        assert!(matches!(ctx.update(), Err(SyncError::InvalidStateTransition { .. })));
        ctx.init().unwrap();
        assert_eq!(ctx.state(), ContextState::Initialized);
        assert!(ctx.propagate().is_err());

        ctx.update().unwrap();
        let plan = ctx.reconcile().unwrap();
        assert_eq!(plan.instruction("a.txt"), Some(Instruction::New));
        let report = ctx.propagate().unwrap();

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(remote.content("a.txt").unwrap(), b"hello");
        assert_eq!(ctx.state(), ContextState::Propagated);
        ctx.destroy().unwrap();
    }

    #[test]
    fn config_dir_is_fixed_after_init() {
        let dir = tempdir().unwrap();
        let (_, _, mut ctx) = context(dir.path());
        ctx.set_config_dir(dir.path().join("other")).unwrap();
        assert_eq!(ctx.config_dir(), dir.path().join("other"));

        ctx.init().unwrap();
        assert!(ctx.set_config_dir(dir.path()).is_err());
        assert!(ctx.remove_config_dir().is_err());
    }

    #[test]
    fn second_context_is_locked_out() {
        let dir = tempdir().unwrap();
        let (_, _, mut first) = context(dir.path());
        first.init().unwrap();

        let (_, _, mut second) = context(dir.path());
        let report = second.run();
        assert_eq!(report.status, RunStatus::Fatal);
        assert_eq!(second.state(), ContextState::Failed);

        first.destroy().unwrap();
        let (_, _, mut third) = context(dir.path());
        assert_eq!(third.run().status, RunStatus::Success);
    }

    #[test]
    fn unreachable_replica_is_fatal_and_touches_nothing() {
        let dir = tempdir().unwrap();
        let (local, remote, mut ctx) = context(dir.path());
        local.put_file("a.txt", "x", 1_000);
        remote.set_unreachable(true);

        let report = ctx.run();
        assert_eq!(report.status, RunStatus::Fatal);
        assert!(report.fatal.is_some());
        assert!(ctx.journal().unwrap().is_empty());
    }

    #[test]
    fn exclude_file_in_config_dir_is_loaded() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("csync_exclude.conf"), "*.tmp\n").unwrap();
        let (local, remote, mut ctx) = context(dir.path());
        local.put_file("keep.txt", "k", 1_000);
        local.put_file("drop.tmp", "d", 1_000);

        let report = ctx.run();
        assert_eq!(report.status, RunStatus::Success);
        assert!(remote.exists("keep.txt"));
        assert!(!remote.exists("drop.tmp"));
    }

    #[test]
    fn detection_failures_are_reported() {
        let dir = tempdir().unwrap();
        let (local, _remote, mut ctx) = context(dir.path());
        local.put_file("ok.txt", "1", 1_000);
        local.put_dir("secret", 1_000);
        local.fail_listing("secret", "permission denied");

        let report = ctx.run();
        assert_eq!(report.status, RunStatus::PartialSuccess);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, "secret");
        assert_eq!(report.errors[0].operation, "detect");
    }

    #[test]
    fn cancelled_run_does_not_cancel_the_next() {
        let dir = tempdir().unwrap();
        let (local, remote, mut ctx) = context(dir.path());
        local.put_file("a.txt", "x", 1_000);

        ctx.cancel_handle().cancel();
        let report = ctx.run();
        assert!(report.cancelled);
        assert_eq!(report.status, RunStatus::PartialSuccess);
        assert!(!remote.exists("a.txt"));
        assert!(!ctx.cancel_handle().is_cancelled());

        let report = ctx.run();
        assert!(!report.cancelled);
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(remote.content("a.txt").unwrap(), b"x");
    }

    #[test]
    fn cancel_handle_round_trip() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        clone.cancel();
        assert!(handle.is_cancelled());
        handle.reset();
        assert!(!clone.is_cancelled());
    }
}
