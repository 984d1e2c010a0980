//! Reconciliation.
//!
//! Merges the local and remote annotated trees into one verdict per path
//! and orders the resulting actions so they can be applied safely.
//!
//! The core is [`merge`], a pure function over the pair of per-replica
//! [`Change`]s. Precedence, first match wins:
//!
//! | local / remote                     | verdict                       |
//! |------------------------------------|-------------------------------|
//! | either `Failed`                    | `Error`                       |
//! | either `Ignored`                   | `Ignore`                      |
//! | both quiet (`Unchanged`/`Absent`)  | `None`                        |
//! | one side changed, other quiet      | propagate from changed side   |
//! | both `Deleted`                     | `Forget`                      |
//! | `Deleted` vs `Touched`             | delete the touched copy       |
//! | `Deleted` vs any other change      | `Conflict` (delete/edit)      |
//! | `Touched` + `Touched`              | `Record`                      |
//! | `Touched` vs content change        | copy from the changed side    |
//! | anything else                      | `Conflict` (both modified)    |
//!
//! Renames are resolved before the table: a rename is propagated when the
//! other replica still has the source unchanged and nothing at the target.
//! Otherwise it counts as a delete of the source and a create of the
//! target.

use csync_core::{
    path, FileEntry, FileTree, Instruction, JournalRecord, Side, TreeNode,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// What happened to a path on one replica since the last sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// No node on this replica.
    Absent,
    /// Present and unchanged.
    Unchanged,
    /// Present, no base version.
    Created,
    /// Content changed.
    Modified,
    /// Metadata changed, content identical.
    Touched,
    /// Object type changed.
    Retyped,
    /// Removed since the base version.
    Deleted,
    /// Ghost of a path that was moved to the given path.
    RenamedTo(String),
    /// Path that was moved here from the given path.
    RenamedFrom(String),
    /// Excluded.
    Ignored,
    /// Could not be inspected.
    Failed,
}

impl Change {
    /// Derives the change from a detected node.
    pub fn of(node: Option<&TreeNode>) -> Self {
        let Some(node) = node else {
            return Change::Absent;
        };
        match node.instruction {
            Instruction::None if node.exists() => Change::Unchanged,
            Instruction::None => Change::Absent,
            Instruction::New => Change::Created,
            Instruction::Modified | Instruction::Conflict => Change::Modified,
            Instruction::Evil => match (&node.entry, &node.base) {
                (Some(entry), Some(base)) if entry.entry_type != base.entry_type => Change::Retyped,
                _ => Change::Touched,
            },
            Instruction::Deleted => Change::Deleted,
            Instruction::Rename => match (&node.rename_to, &node.rename_from) {
                (Some(to), _) => Change::RenamedTo(to.clone()),
                (None, Some(from)) => Change::RenamedFrom(from.clone()),
                (None, None) => Change::Created,
            },
            Instruction::Ignore => Change::Ignored,
            Instruction::Error => Change::Failed,
        }
    }

    fn is_quiet(&self) -> bool {
        matches!(self, Change::Absent | Change::Unchanged)
    }

    /// A rename that cannot be propagated as such.
    fn degrade(&self) -> Self {
        match self {
            Change::RenamedTo(_) => Change::Deleted,
            Change::RenamedFrom(_) => Change::Created,
            other => other.clone(),
        }
    }
}

/// Kind of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "side")]
pub enum ConflictKind {
    /// Both replicas changed the path differently.
    BothModified,
    /// The path was deleted on the given replica and changed on the other.
    DeletedOn(Side),
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::BothModified => f.write_str("modified on both replicas"),
            ConflictKind::DeletedOn(side) => write!(f, "deleted on {side}, changed on {}", side.other()),
        }
    }
}

/// The merged decision for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing to do.
    None,
    /// Excluded; never propagated.
    Ignore,
    /// Failed on a replica; retried next run.
    Error,
    /// Deleted on both replicas; drop the journal record.
    Forget,
    /// Both replicas agree; refresh the journal record.
    Record,
    /// Copy content from `from` to the other replica.
    Copy {
        /// Source replica.
        from: Side,
    },
    /// Replace the other replica's object with `from`'s (type change).
    Replace {
        /// Source replica.
        from: Side,
    },
    /// Copy only mtime and mode from `from`.
    Restamp {
        /// Source replica.
        from: Side,
    },
    /// Delete the path on `on`.
    Delete {
        /// Replica to delete on.
        on: Side,
    },
    /// Keep both versions and report.
    Conflict(ConflictKind),
    /// This path is a rename target; move `from` here on `on`.
    Rename {
        /// Replica to rename on.
        on: Side,
        /// Source path.
        from: String,
    },
    /// This path is a rename source handled by its target.
    Moved {
        /// Target path.
        to: String,
    },
    /// Re-create a directory on `on` (deferred directory deletion).
    Mkdir {
        /// Replica to create on.
        on: Side,
    },
}

/// Merges one path's local and remote changes.
#[must_use]
pub fn merge(local: &Change, remote: &Change) -> Verdict {
    use Change::{Created, Deleted, Failed, Ignored, Modified, Retyped, Touched};

    if *local == Failed || *remote == Failed {
        return Verdict::Error;
    }
    if *local == Ignored || *remote == Ignored {
        return Verdict::Ignore;
    }

    let local = local.degrade();
    let remote = remote.degrade();

    match (local.is_quiet(), remote.is_quiet()) {
        (true, true) => return Verdict::None,
        (false, true) => return one_sided(&local, Side::Local),
        (true, false) => return one_sided(&remote, Side::Remote),
        (false, false) => {}
    }

    match (&local, &remote) {
        (Deleted, Deleted) => Verdict::Forget,
        (Deleted, Touched) => Verdict::Delete { on: Side::Remote },
        (Touched, Deleted) => Verdict::Delete { on: Side::Local },
        (Deleted, _) => Verdict::Conflict(ConflictKind::DeletedOn(Side::Local)),
        (_, Deleted) => Verdict::Conflict(ConflictKind::DeletedOn(Side::Remote)),
        (Touched, Touched) => Verdict::Record,
        (Touched, Created | Modified) => Verdict::Copy { from: Side::Remote },
        (Created | Modified, Touched) => Verdict::Copy { from: Side::Local },
        (Touched, Retyped) => Verdict::Replace { from: Side::Remote },
        (Retyped, Touched) => Verdict::Replace { from: Side::Local },
        _ => Verdict::Conflict(ConflictKind::BothModified),
    }
}

fn one_sided(change: &Change, from: Side) -> Verdict {
    match change {
        Change::Created | Change::Modified => Verdict::Copy { from },
        Change::Touched => Verdict::Restamp { from },
        Change::Retyped => Verdict::Replace { from },
        Change::Deleted => Verdict::Delete { on: from.other() },
        _ => Verdict::None,
    }
}

/// What the propagator does for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// Create a directory on `on`.
    Mkdir {
        /// Target replica.
        on: Side,
    },
    /// Copy a file or symlink from `from`.
    Copy {
        /// Source replica.
        from: Side,
    },
    /// Remove the other replica's object, then copy from `from`.
    Replace {
        /// Source replica.
        from: Side,
    },
    /// Copy mtime and mode from `from`.
    Restamp {
        /// Source replica.
        from: Side,
    },
    /// Preserve both versions.
    Conflict {
        /// Conflict kind.
        kind: ConflictKind,
    },
    /// Move `from` to this path on `on`.
    Rename {
        /// Target replica.
        on: Side,
        /// Source path.
        from: String,
    },
    /// Delete on `on`; `recursive` when excluded content remains below.
    Delete {
        /// Target replica.
        on: Side,
        /// Remove the whole subtree.
        recursive: bool,
    },
    /// Drop the journal record.
    Forget,
    /// Refresh the journal record from both replicas.
    Record,
}

impl ActionKind {
    /// Short name for logs and reports.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Mkdir { .. } => "mkdir",
            ActionKind::Copy { .. } => "copy",
            ActionKind::Replace { .. } => "replace",
            ActionKind::Restamp { .. } => "restamp",
            ActionKind::Conflict { .. } => "conflict",
            ActionKind::Rename { .. } => "rename",
            ActionKind::Delete { .. } => "delete",
            ActionKind::Forget => "forget",
            ActionKind::Record => "record",
        }
    }
}

/// Execution phase; actions run phase by phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Directory creation, parents first.
    Mkdir,
    /// Copies, replacements, restamps and conflicts.
    Transfer,
    /// Renames.
    Rename,
    /// Deletions, children first.
    Delete,
    /// Journal record removal.
    Forget,
    /// Journal record refresh.
    Record,
}

/// One step of an [`ActionPlan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Path the action applies to.
    pub path: String,
    /// What to do.
    pub kind: ActionKind,
    /// The merged instruction this action implements.
    pub instruction: Instruction,
    /// Local entry as detected.
    pub local: Option<FileEntry>,
    /// Remote entry as detected.
    pub remote: Option<FileEntry>,
    /// Base version.
    pub base: Option<JournalRecord>,
}

impl Action {
    /// Returns the detected entry on `side`.
    #[must_use]
    pub fn entry(&self, side: Side) -> Option<&FileEntry> {
        match side {
            Side::Local => self.local.as_ref(),
            Side::Remote => self.remote.as_ref(),
        }
    }

    fn holds_directory(&self) -> bool {
        [&self.local, &self.remote]
            .into_iter()
            .flatten()
            .any(|e| e.entry_type.is_dir())
    }

    /// Returns the phase this action runs in.
    #[must_use]
    pub fn phase(&self) -> Phase {
        match &self.kind {
            ActionKind::Mkdir { .. } => Phase::Mkdir,
            ActionKind::Replace { from } if self.entry(*from).is_some_and(|e| e.entry_type.is_dir()) => {
                Phase::Mkdir
            }
            // Descendant mkdirs need the directory in place first.
            ActionKind::Conflict { .. } if self.holds_directory() => Phase::Mkdir,
            ActionKind::Copy { .. }
            | ActionKind::Replace { .. }
            | ActionKind::Restamp { .. }
            | ActionKind::Conflict { .. } => Phase::Transfer,
            ActionKind::Rename { .. } => Phase::Rename,
            ActionKind::Delete { .. } => Phase::Delete,
            ActionKind::Forget => Phase::Forget,
            ActionKind::Record => Phase::Record,
        }
    }
}

/// Ordered actions plus the merged instruction of every path.
#[derive(Debug, Clone, Default)]
pub struct ActionPlan {
    actions: Vec<Action>,
    instructions: BTreeMap<String, Instruction>,
}

impl ActionPlan {
    /// Actions in execution order.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Merged instruction per path.
    #[must_use]
    pub fn instructions(&self) -> &BTreeMap<String, Instruction> {
        &self.instructions
    }

    /// Merged instruction for `path`.
    #[must_use]
    pub fn instruction(&self, path: &str) -> Option<Instruction> {
        self.instructions.get(path).copied()
    }

    /// Number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true if there is nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

fn tree_of<'a>(side: Side, local: &'a FileTree, remote: &'a FileTree) -> &'a FileTree {
    match side {
        Side::Local => local,
        Side::Remote => remote,
    }
}

fn is_dir_anywhere(local: &FileTree, remote: &FileTree, path: &str) -> bool {
    let entry_dir = |tree: &FileTree| {
        tree.get(path)
            .and_then(|n| n.entry.as_ref())
            .is_some_and(|e| e.entry_type.is_dir())
    };
    let base_dir = || {
        local
            .get(path)
            .or_else(|| remote.get(path))
            .and_then(|n| n.base.as_ref())
            .is_some_and(|b| b.entry_type.is_dir())
    };
    entry_dir(local) || entry_dir(remote) || base_dir()
}

/// Merges two annotated trees into an ordered plan.
pub fn reconcile(local: &FileTree, remote: &FileTree) -> ActionPlan {
    let mut verdicts: BTreeMap<String, Verdict> = BTreeMap::new();

    resolve_renames(local, remote, &mut verdicts);

    let paths: BTreeSet<&str> = local.paths().chain(remote.paths()).collect();
    for path in paths {
        if verdicts.contains_key(path) {
            continue;
        }
        let l = Change::of(local.get(path));
        let r = Change::of(remote.get(path));
        let mut verdict = merge(&l, &r);
        if verdict == Verdict::Conflict(ConflictKind::BothModified)
            && provably_identical(entry_of(local, path), entry_of(remote, path))
        {
            verdict = Verdict::Record;
        }
        verdicts.insert(path.to_string(), verdict);
    }

    apply_blocked_ancestors(&mut verdicts);
    let recursive = defer_directory_deletes(local, remote, &mut verdicts);

    build_plan(local, remote, verdicts, &recursive)
}

fn entry_of<'a>(tree: &'a FileTree, path: &str) -> Option<&'a FileEntry> {
    tree.get(path).and_then(|n| n.entry.as_ref())
}

/// Both entries are known to hold the same thing without reading content.
fn provably_identical(local: Option<&FileEntry>, remote: Option<&FileEntry>) -> bool {
    let (Some(l), Some(r)) = (local, remote) else {
        return false;
    };
    if l.entry_type != r.entry_type {
        return false;
    }
    if l.entry_type.is_dir() {
        return true;
    }
    l.size == r.size && l.checksum.is_some() && l.checksum == r.checksum
}

fn resolve_renames(local: &FileTree, remote: &FileTree, verdicts: &mut BTreeMap<String, Verdict>) {
    for side in [Side::Local, Side::Remote] {
        let mine = tree_of(side, local, remote);
        let theirs = tree_of(side.other(), local, remote);

        for ghost in mine.iter() {
            let (Instruction::Rename, Some(to)) = (ghost.instruction, &ghost.rename_to) else {
                continue;
            };
            let from = &ghost.path;
            if verdicts.contains_key(from) || verdicts.contains_key(to) {
                continue;
            }

            let their_from = Change::of(theirs.get(from));
            let their_to = Change::of(theirs.get(to));
            let my_to = Change::of(mine.get(to));
            if my_to != Change::RenamedFrom(from.clone()) {
                continue;
            }

            if their_from == Change::RenamedTo(to.clone())
                && their_to == Change::RenamedFrom(from.clone())
            {
                tracing::debug!(from = %from, to = %to, "same rename on both replicas");
                verdicts.insert(from.clone(), Verdict::Forget);
                verdicts.insert(to.clone(), Verdict::Record);
            } else if their_from == Change::Unchanged && their_to == Change::Absent {
                verdicts.insert(
                    to.clone(),
                    Verdict::Rename {
                        on: side.other(),
                        from: from.clone(),
                    },
                );
                verdicts.insert(from.clone(), Verdict::Moved { to: to.clone() });
            } else {
                tracing::debug!(
                    side = %side,
                    from = %from,
                    to = %to,
                    "rename competes with a change on the other replica, treating as delete + create"
                );
            }
        }
    }
}

/// Descendants of `Error`/`Ignore` paths inherit that verdict.
fn apply_blocked_ancestors(verdicts: &mut BTreeMap<String, Verdict>) {
    let paths: Vec<String> = verdicts.keys().cloned().collect();
    for p in &paths {
        let blocked = path::ancestors(p).find_map(|ancestor| match verdicts.get(ancestor) {
            Some(Verdict::Error) => Some(Verdict::Error),
            Some(Verdict::Ignore) => Some(Verdict::Ignore),
            _ => None,
        });
        if let Some(verdict) = blocked {
            verdicts.insert(p.clone(), verdict);
        }
    }

    // A rename whose target was blocked leaves its source alone.
    for p in &paths {
        if let Some(Verdict::Moved { to }) = verdicts.get(p) {
            if !matches!(verdicts.get(to), Some(Verdict::Rename { .. })) {
                verdicts.insert(p.clone(), Verdict::None);
            }
        }
    }
}

/// Keeps a directory whose deletion would take surviving content with it.
/// Returns the directory deletes that must be recursive.
fn defer_directory_deletes(
    local: &FileTree,
    remote: &FileTree,
    verdicts: &mut BTreeMap<String, Verdict>,
) -> HashSet<String> {
    let mut recursive = HashSet::new();
    let dirs: Vec<String> = verdicts
        .iter()
        .rev()
        .filter(|(p, v)| match v {
            Verdict::Delete { .. } | Verdict::Forget => is_dir_anywhere(local, remote, p),
            Verdict::Replace { from } => entry_of(tree_of(from.other(), local, remote), p)
                .is_some_and(|e| e.entry_type.is_dir()),
            _ => false,
        })
        .map(|(p, _)| p.clone())
        .collect();

    for dir in dirs {
        let (start, end) = path::descendant_range(&dir);
        let mut survivors = false;
        let mut ignored = false;
        for verdict in verdicts.range(start..end).map(|(_, v)| v) {
            match verdict {
                Verdict::Delete { .. } | Verdict::Forget | Verdict::Moved { .. } => {}
                Verdict::Ignore => ignored = true,
                _ => survivors = true,
            }
        }

        if survivors {
            let kept = match verdicts.get(&dir) {
                Some(Verdict::Delete { on }) => Verdict::Mkdir { on: on.other() },
                Some(Verdict::Replace { .. }) => {
                    tracing::warn!(path = %dir, "type change would discard changed content below, skipping");
                    Verdict::Error
                }
                _ => Verdict::None,
            };
            tracing::debug!(path = %dir, "directory still has content, keeping it");
            verdicts.insert(dir, kept);
        } else if ignored {
            recursive.insert(dir);
        }
    }
    recursive
}

fn build_plan(
    local: &FileTree,
    remote: &FileTree,
    verdicts: BTreeMap<String, Verdict>,
    recursive: &HashSet<String>,
) -> ActionPlan {
    let mut plan = ActionPlan::default();

    for (path, verdict) in verdicts {
        let local_node = local.get(&path);
        let remote_node = remote.get(&path);
        let local_entry = local_node.and_then(|n| n.entry.clone());
        let remote_entry = remote_node.and_then(|n| n.entry.clone());
        let base = local_node
            .and_then(|n| n.base.clone())
            .or_else(|| remote_node.and_then(|n| n.base.clone()));

        let source_is_dir = |side: Side| {
            let entry = match side {
                Side::Local => local_entry.as_ref(),
                Side::Remote => remote_entry.as_ref(),
            };
            entry.is_some_and(|e| e.entry_type.is_dir())
        };

        let (kind, instruction) = match verdict {
            Verdict::None => (None, Instruction::None),
            Verdict::Ignore => (None, Instruction::Ignore),
            Verdict::Error => (None, Instruction::Error),
            Verdict::Moved { .. } => (None, Instruction::Rename),
            Verdict::Forget => (Some(ActionKind::Forget), Instruction::Deleted),
            Verdict::Record => (Some(ActionKind::Record), Instruction::None),
            Verdict::Copy { from } => {
                let instruction = if base.is_none() {
                    Instruction::New
                } else {
                    Instruction::Modified
                };
                let kind = if source_is_dir(from) {
                    ActionKind::Mkdir { on: from.other() }
                } else {
                    ActionKind::Copy { from }
                };
                (Some(kind), instruction)
            }
            Verdict::Replace { from } => (Some(ActionKind::Replace { from }), Instruction::Evil),
            Verdict::Restamp { from } => (Some(ActionKind::Restamp { from }), Instruction::Evil),
            Verdict::Delete { on } => (
                Some(ActionKind::Delete {
                    on,
                    recursive: recursive.contains(&path),
                }),
                Instruction::Deleted,
            ),
            Verdict::Conflict(kind) => (Some(ActionKind::Conflict { kind }), Instruction::Conflict),
            Verdict::Rename { on, from } => (Some(ActionKind::Rename { on, from }), Instruction::Rename),
            Verdict::Mkdir { on } => (Some(ActionKind::Mkdir { on }), Instruction::New),
        };

        plan.instructions.insert(path.clone(), instruction);
        if let Some(kind) = kind {
            plan.actions.push(Action {
                path,
                kind,
                instruction,
                local: local_entry,
                remote: remote_entry,
                base,
            });
        }
    }

    plan.actions.sort_by(|a, b| {
        a.phase().cmp(&b.phase()).then_with(|| {
            if a.phase() == Phase::Delete {
                b.path.cmp(&a.path)
            } else {
                a.path.cmp(&b.path)
            }
        })
    });

    let changes = plan.instructions.values().filter(|i| i.is_change()).count();
    let conflicts = plan
        .actions
        .iter()
        .filter(|a| matches!(a.kind, ActionKind::Conflict { .. }))
        .count();
    tracing::info!(
        paths = plan.instructions.len(),
        actions = plan.actions.len(),
        changes,
        conflicts,
        "reconciliation finished"
    );
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use csync_core::EntryType;
    use proptest::prelude::*;

    fn entry(path: &str, ty: EntryType) -> FileEntry {
        match ty {
            EntryType::Directory => FileEntry::directory(path, 10),
            _ => FileEntry::file(path, 1, 10),
        }
    }

    fn present(path: &str, ty: EntryType, instruction: Instruction) -> TreeNode {
        let mut node = TreeNode::present(entry(path, ty));
        node.instruction = instruction;
        node
    }

    fn synced(path: &str, ty: EntryType, instruction: Instruction) -> TreeNode {
        let mut node = present(path, ty, instruction);
        let e = entry(path, ty);
        node.base = Some(JournalRecord::from_entries(&e, &e, None));
        node
    }

    fn ghost(path: &str, ty: EntryType, instruction: Instruction) -> TreeNode {
        let e = entry(path, ty);
        let mut node = TreeNode::ghost(JournalRecord::from_entries(&e, &e, None));
        node.instruction = instruction;
        node
    }

    fn tree(nodes: Vec<TreeNode>) -> FileTree {
        let mut tree = FileTree::new();
        for node in nodes {
            tree.insert(node);
        }
        tree
    }

    fn kinds(plan: &ActionPlan) -> Vec<(&str, ActionKind)> {
        plan.actions().iter().map(|a| (a.path.as_str(), a.kind.clone())).collect()
    }

    #[test]
    fn merge_table() {
        use Change::*;
        let cases = [
            (Failed, Created, Verdict::Error),
            (Ignored, Modified, Verdict::Ignore),
            (Unchanged, Absent, Verdict::None),
            (Created, Absent, Verdict::Copy { from: Side::Local }),
            (Unchanged, Touched, Verdict::Restamp { from: Side::Remote }),
            (Retyped, Unchanged, Verdict::Replace { from: Side::Local }),
            (Unchanged, Deleted, Verdict::Delete { on: Side::Local }),
            (Deleted, Deleted, Verdict::Forget),
            (Deleted, Touched, Verdict::Delete { on: Side::Remote }),
            (Deleted, Modified, Verdict::Conflict(ConflictKind::DeletedOn(Side::Local))),
            (Retyped, Deleted, Verdict::Conflict(ConflictKind::DeletedOn(Side::Remote))),
            (Touched, Touched, Verdict::Record),
            (Touched, Modified, Verdict::Copy { from: Side::Remote }),
            (Modified, Modified, Verdict::Conflict(ConflictKind::BothModified)),
            (Created, Created, Verdict::Conflict(ConflictKind::BothModified)),
            (RenamedTo("b".into()), Modified, Verdict::Conflict(ConflictKind::DeletedOn(Side::Local))),
            (RenamedFrom("a".into()), Absent, Verdict::Copy { from: Side::Local }),
        ];
        for (local, remote, expected) in cases {
            assert_eq!(merge(&local, &remote), expected, "{local:?} / {remote:?}");
        }
    }

    fn mirrored(verdict: Verdict) -> Verdict {
        match verdict {
            Verdict::Copy { from } => Verdict::Copy { from: from.other() },
            Verdict::Replace { from } => Verdict::Replace { from: from.other() },
            Verdict::Restamp { from } => Verdict::Restamp { from: from.other() },
            Verdict::Delete { on } => Verdict::Delete { on: on.other() },
            Verdict::Mkdir { on } => Verdict::Mkdir { on: on.other() },
            Verdict::Conflict(ConflictKind::DeletedOn(side)) => {
                Verdict::Conflict(ConflictKind::DeletedOn(side.other()))
            }
            other => other,
        }
    }

    fn any_change() -> impl Strategy<Value = Change> {
        prop_oneof![
            Just(Change::Absent),
            Just(Change::Unchanged),
            Just(Change::Created),
            Just(Change::Modified),
            Just(Change::Touched),
            Just(Change::Retyped),
            Just(Change::Deleted),
            "[a-c]".prop_map(Change::RenamedTo),
            "[a-c]".prop_map(Change::RenamedFrom),
            Just(Change::Ignored),
            Just(Change::Failed),
        ]
    }

    proptest! {
        #[test]
        fn merge_is_symmetric(local in any_change(), remote in any_change()) {
            prop_assert_eq!(merge(&remote, &local), mirrored(merge(&local, &remote)));
        }

        #[test]
        fn failures_dominate(other in any_change()) {
            prop_assert_eq!(merge(&Change::Failed, &other), Verdict::Error);
            prop_assert_eq!(merge(&other, &Change::Failed), Verdict::Error);
        }

        #[test]
        fn changed_content_is_never_deleted(local in any_change(), remote in any_change()) {
            if let Verdict::Delete { on } = merge(&local, &remote) {
                let victim = match on {
                    Side::Local => local.degrade(),
                    Side::Remote => remote.degrade(),
                };
                prop_assert!(
                    matches!(victim, Change::Unchanged | Change::Absent | Change::Touched),
                    "deleting {:?}", victim
                );
            }
        }
    }

    #[test]
    fn one_sided_rename_is_propagated() {
        let mut old = ghost("old", EntryType::File, Instruction::Rename);
        old.rename_to = Some("new".into());
        let mut new = present("new", EntryType::File, Instruction::Rename);
        new.rename_from = Some("old".into());

        let local = tree(vec![old, new]);
        let remote = tree(vec![synced("old", EntryType::File, Instruction::None)]);
        let plan = reconcile(&local, &remote);

        assert_eq!(plan.instruction("new"), Some(Instruction::Rename));
        assert_eq!(plan.instruction("old"), Some(Instruction::Rename));
        assert_eq!(
            kinds(&plan),
            vec![(
                "new",
                ActionKind::Rename {
                    on: Side::Remote,
                    from: "old".into()
                }
            )]
        );
    }

    #[test]
    fn rename_against_edit_degrades() {
        let mut old = ghost("old", EntryType::File, Instruction::Rename);
        old.rename_to = Some("new".into());
        let mut new = present("new", EntryType::File, Instruction::Rename);
        new.rename_from = Some("old".into());

        let local = tree(vec![old, new]);
        let remote = tree(vec![synced("old", EntryType::File, Instruction::Modified)]);
        let plan = reconcile(&local, &remote);

        assert_eq!(plan.instruction("old"), Some(Instruction::Conflict));
        assert_eq!(plan.instruction("new"), Some(Instruction::New));
    }

    #[test]
    fn deleted_directory_with_new_content_is_kept() {
        let local = tree(vec![
            ghost("d", EntryType::Directory, Instruction::Deleted),
            ghost("d/a", EntryType::File, Instruction::Deleted),
        ]);
        let remote = tree(vec![
            synced("d", EntryType::Directory, Instruction::None),
            synced("d/a", EntryType::File, Instruction::None),
            present("d/b", EntryType::File, Instruction::New),
        ]);
        let plan = reconcile(&local, &remote);

        assert_eq!(
            kinds(&plan),
            vec![
                ("d", ActionKind::Mkdir { on: Side::Local }),
                ("d/b", ActionKind::Copy { from: Side::Remote }),
                (
                    "d/a",
                    ActionKind::Delete {
                        on: Side::Remote,
                        recursive: false
                    }
                ),
            ]
        );
    }

    #[test]
    fn deletes_run_children_first() {
        let local = tree(vec![
            ghost("x", EntryType::Directory, Instruction::Deleted),
            ghost("x/y", EntryType::Directory, Instruction::Deleted),
            ghost("x/y/z", EntryType::File, Instruction::Deleted),
        ]);
        let remote = tree(vec![
            synced("x", EntryType::Directory, Instruction::None),
            synced("x/y", EntryType::Directory, Instruction::None),
            synced("x/y/z", EntryType::File, Instruction::None),
        ]);
        let plan = reconcile(&local, &remote);
        let order: Vec<&str> = plan.actions().iter().map(|a| a.path.as_str()).collect();
        assert_eq!(order, vec!["x/y/z", "x/y", "x"]);
    }

    #[test]
    fn ignored_leftovers_make_delete_recursive() {
        let local = tree(vec![
            ghost("d", EntryType::Directory, Instruction::Deleted),
            ghost("d/a", EntryType::File, Instruction::Deleted),
        ]);
        let remote = tree(vec![
            synced("d", EntryType::Directory, Instruction::None),
            synced("d/a", EntryType::File, Instruction::None),
            present("d/cache.tmp", EntryType::File, Instruction::Ignore),
        ]);
        let plan = reconcile(&local, &remote);
        let dir = plan.actions().iter().find(|a| a.path == "d").unwrap();
        assert_eq!(
            dir.kind,
            ActionKind::Delete {
                on: Side::Remote,
                recursive: true
            }
        );
    }

    #[test]
    fn failed_directory_blocks_descendants() {
        let local = tree(vec![TreeNode::failed("e", "permission denied")]);
        let remote = tree(vec![
            synced("e", EntryType::Directory, Instruction::None),
            synced("e/f", EntryType::File, Instruction::Modified),
        ]);
        let plan = reconcile(&local, &remote);
        assert_eq!(plan.instruction("e"), Some(Instruction::Error));
        assert_eq!(plan.instruction("e/f"), Some(Instruction::Error));
        assert!(plan.is_empty());
    }

    #[test]
    fn directories_created_on_both_sides_are_recorded() {
        let local = tree(vec![present("shared", EntryType::Directory, Instruction::New)]);
        let remote = tree(vec![present("shared", EntryType::Directory, Instruction::New)]);
        let plan = reconcile(&local, &remote);
        assert_eq!(kinds(&plan), vec![("shared", ActionKind::Record)]);
        assert_eq!(plan.instruction("shared"), Some(Instruction::None));
    }

    #[test]
    fn new_directory_copies_become_mkdirs_ahead_of_files() {
        let local = tree(vec![
            present("a", EntryType::Directory, Instruction::New),
            present("a/f", EntryType::File, Instruction::New),
            present("b.txt", EntryType::File, Instruction::New),
        ]);
        let plan = reconcile(&local, &FileTree::new());
        assert_eq!(
            kinds(&plan),
            vec![
                ("a", ActionKind::Mkdir { on: Side::Remote }),
                ("a/f", ActionKind::Copy { from: Side::Local }),
                ("b.txt", ActionKind::Copy { from: Side::Local }),
            ]
        );
    }

    #[test]
    fn file_against_directory_conflict_precedes_nested_mkdirs() {
        let local = tree(vec![present("a", EntryType::File, Instruction::New)]);
        let remote = tree(vec![
            present("a", EntryType::Directory, Instruction::New),
            present("a/b", EntryType::Directory, Instruction::New),
            present("a/b/c", EntryType::File, Instruction::New),
        ]);
        let plan = reconcile(&local, &remote);
        assert_eq!(
            kinds(&plan),
            vec![
                (
                    "a",
                    ActionKind::Conflict {
                        kind: ConflictKind::BothModified
                    }
                ),
                ("a/b", ActionKind::Mkdir { on: Side::Local }),
                ("a/b/c", ActionKind::Copy { from: Side::Remote }),
            ]
        );
    }
}
