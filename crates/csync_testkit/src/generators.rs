//! Property-based test generators using proptest.
//!
//! Trees are maps from path to file content. Generated trees never hold a
//! file and a path below it, so they can always be materialized.

use csync_core::path;
use csync_engine::MemoryReplica;
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for a single path component.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-d]{1,2}").expect("Invalid regex")
}

/// Strategy for a relative path of one to three components.
pub fn path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(name_strategy(), 1..=3).prop_map(|parts| parts.join("/"))
}

/// Strategy for file content.
pub fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for a materializable tree of files.
pub fn tree_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(path_strategy(), content_strategy(), 0..12).prop_map(|files| {
        let mut kept: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for (path, content) in files {
            let shadowed = path::ancestors(&path).any(|a| kept.contains_key(a))
                || kept.keys().any(|k| path::is_ancestor(&path, k));
            if !shadowed {
                kept.insert(path, content);
            }
        }
        kept
    })
}

/// One change made to a replica between syncs.
#[derive(Debug, Clone)]
pub enum Edit {
    /// Create a file (skipped if it would collide with an existing path).
    Create {
        /// Path to create.
        path: String,
        /// New content.
        content: Vec<u8>,
    },
    /// Rewrite the n-th existing file.
    Modify {
        /// Index into the existing files, modulo their count.
        index: usize,
        /// New content.
        content: Vec<u8>,
    },
    /// Delete the n-th existing file.
    Delete {
        /// Index into the existing files, modulo their count.
        index: usize,
    },
    /// Change the n-th existing file's modification time only.
    Touch {
        /// Index into the existing files, modulo their count.
        index: usize,
    },
}

/// Strategy for a single edit.
pub fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (path_strategy(), content_strategy()).prop_map(|(path, content)| Edit::Create { path, content }),
        (any::<usize>(), content_strategy()).prop_map(|(index, content)| Edit::Modify { index, content }),
        any::<usize>().prop_map(|index| Edit::Delete { index }),
        any::<usize>().prop_map(|index| Edit::Touch { index }),
    ]
}

/// Strategy for a sequence of up to `max` edits.
pub fn edits_strategy(max: usize) -> impl Strategy<Value = Vec<Edit>> {
    prop::collection::vec(edit_strategy(), 0..=max)
}

/// Writes every file of `tree` into `replica`.
pub fn populate(replica: &MemoryReplica, tree: &BTreeMap<String, Vec<u8>>, mtime: i64) {
    for (path, content) in tree {
        replica.put_file(path, content, mtime);
    }
}

fn files(replica: &MemoryReplica) -> Vec<String> {
    replica
        .paths()
        .into_iter()
        .filter(|p| replica.entry(p).is_some_and(|e| !e.entry_type.is_dir()))
        .collect()
}

/// Applies `edit` to `replica`, stamping changes with `mtime`. Returns
/// false when the edit did not apply.
pub fn apply_edit(replica: &MemoryReplica, edit: &Edit, mtime: i64) -> bool {
    match edit {
        Edit::Create { path, content } => {
            let blocked = replica.exists(path)
                || path::ancestors(path)
                    .any(|a| replica.entry(a).is_some_and(|e| !e.entry_type.is_dir()));
            if !blocked {
                replica.put_file(path, content, mtime);
            }
            !blocked
        }
        Edit::Modify { index, content } => pick(replica, *index).is_some_and(|p| {
            replica.edit_file(&p, content, mtime);
            true
        }),
        Edit::Delete { index } => pick(replica, *index).is_some_and(|p| {
            replica.delete(&p);
            true
        }),
        Edit::Touch { index } => pick(replica, *index).is_some_and(|p| {
            replica.touch(&p, mtime);
            true
        }),
    }
}

fn pick(replica: &MemoryReplica, index: usize) -> Option<String> {
    let files = files(replica);
    if files.is_empty() {
        None
    } else {
        Some(files[index % files.len()].clone())
    }
}
