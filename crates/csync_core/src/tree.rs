//! The file tree model.
//!
//! A [`FileTree`] is one replica's snapshot annotated with journal records
//! and per-path instructions. It is keyed by normalized path in byte order,
//! so a directory always precedes its descendants and the descendants of a
//! directory form one contiguous key range.

use crate::exclude::ExcludeSet;
use crate::journal::JournalRecord;
use crate::path;
use crate::types::{FileEntry, Instruction};
use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

/// A path that could not be listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalError {
    /// Replica-relative path.
    pub path: String,
    /// What went wrong.
    pub reason: String,
}

impl TraversalError {
    /// Creates a traversal error.
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TraversalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

impl std::error::Error for TraversalError {}

/// One path in a [`FileTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    /// Replica-relative path.
    pub path: String,
    /// Current entry; `None` for a ghost (journal record whose path is gone).
    pub entry: Option<FileEntry>,
    /// Base version from the journal.
    pub base: Option<JournalRecord>,
    /// Verdict for this path.
    pub instruction: Instruction,
    /// For a renamed path: where it came from.
    pub rename_from: Option<String>,
    /// For a ghost that was renamed: where it went.
    pub rename_to: Option<String>,
    /// Failure description for `Error` nodes.
    pub error: Option<String>,
}

impl TreeNode {
    /// Creates a node for a listed entry.
    #[must_use]
    pub fn present(entry: FileEntry) -> Self {
        Self {
            path: entry.path.clone(),
            entry: Some(entry),
            base: None,
            instruction: Instruction::None,
            rename_from: None,
            rename_to: None,
            error: None,
        }
    }

    /// Creates a ghost node for a record whose path is missing.
    #[must_use]
    pub fn ghost(record: JournalRecord) -> Self {
        Self {
            path: record.path.clone(),
            entry: None,
            base: Some(record),
            instruction: Instruction::None,
            rename_from: None,
            rename_to: None,
            error: None,
        }
    }

    /// Creates an `Error` node.
    #[must_use]
    pub fn failed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            entry: None,
            base: None,
            instruction: Instruction::Error,
            rename_from: None,
            rename_to: None,
            error: Some(reason.into()),
        }
    }

    /// Returns true if the path exists in the snapshot.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.entry.is_some()
    }

    /// Returns true for ghost nodes.
    #[must_use]
    pub fn is_ghost(&self) -> bool {
        self.entry.is_none() && self.base.is_some()
    }

    /// Returns true if the current entry, or else the base, is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        match (&self.entry, &self.base) {
            (Some(entry), _) => entry.entry_type.is_dir(),
            (None, Some(base)) => base.entry_type.is_dir(),
            (None, None) => false,
        }
    }
}

/// An ordered map of path to [`TreeNode`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTree {
    nodes: BTreeMap<String, TreeNode>,
}

impl FileTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tree from a replica listing.
    ///
    /// - excluded paths become `Ignore` nodes
    /// - traversal failures become `Error` nodes
    /// - anything below an `Ignore` or `Error` directory is dropped
    /// - a duplicate path keeps its first entry, except that a failure
    ///   reported for an already listed path turns it into an `Error` node
    pub fn from_listing<I>(listing: I, excludes: &ExcludeSet) -> Self
    where
        I: IntoIterator<Item = Result<FileEntry, TraversalError>>,
    {
        let mut tree = Self::new();

        for item in listing {
            let (path, node) = match item {
                Err(err) if tree.nodes.contains_key(&err.path) => {
                    // A directory that listed but could not be read.
                    tracing::warn!(path = %err.path, reason = %err.reason, "traversal failure");
                    if let Some(node) = tree.nodes.get_mut(&err.path) {
                        node.instruction = Instruction::Error;
                        node.error = Some(err.reason);
                    }
                    continue;
                }
                Ok(entry) => {
                    let path = entry.path.clone();
                    let excluded = excludes.is_excluded_entry(&path, entry.entry_type.is_dir());
                    let mut node = TreeNode::present(entry);
                    if excluded {
                        node.instruction = Instruction::Ignore;
                    }
                    (path, node)
                }
                Err(err) => {
                    tracing::warn!(path = %err.path, reason = %err.reason, "traversal failure");
                    let node = TreeNode::failed(err.path.clone(), err.reason);
                    (err.path, node)
                }
            };

            if tree.under_pruned(&path) {
                continue;
            }

            match tree.nodes.entry(path) {
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(node);
                }
                btree_map::Entry::Occupied(slot) => {
                    tracing::warn!(path = %slot.key(), "duplicate path in listing, keeping the first");
                }
            }
        }

        tree
    }

    fn under_pruned(&self, path: &str) -> bool {
        path::ancestors(path).any(|ancestor| {
            self.nodes.get(ancestor).is_some_and(|node| {
                matches!(node.instruction, Instruction::Ignore | Instruction::Error)
            })
        })
    }

    /// Inserts or replaces a node.
    pub fn insert(&mut self, node: TreeNode) -> Option<TreeNode> {
        self.nodes.insert(node.path.clone(), node)
    }

    /// Returns the node for `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&TreeNode> {
        self.nodes.get(path)
    }

    /// Returns the node for `path` mutably.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut TreeNode> {
        self.nodes.get_mut(path)
    }

    /// Returns true if `path` has a node.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    /// Iterates over nodes in path order.
    pub fn iter(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values()
    }

    /// Iterates over nodes mutably in path order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TreeNode> {
        self.nodes.values_mut()
    }

    /// Iterates over paths in order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Iterates over the nodes strictly below `dir`.
    pub fn descendants<'a>(&'a self, dir: &str) -> impl Iterator<Item = &'a TreeNode> + 'a {
        let (start, end) = path::descendant_range(dir);
        self.nodes.range(start..end).map(|(_, node)| node)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the tree has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<'a> IntoIterator for &'a FileTree {
    type Item = &'a TreeNode;
    type IntoIter = btree_map::Values<'a, String, TreeNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.values()
    }
}
