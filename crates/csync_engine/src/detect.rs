//! Update detection.
//!
//! Compares one replica's snapshot against the journal and annotates every
//! path with what happened to it since the last sync. Runs once per
//! replica; the two runs share nothing but read-only journal access.

use crate::config::DetectOptions;
use crate::error::SyncResult;
use crate::replica::{content_checksum, Replica};
use csync_core::{
    path, EntryType, ExcludeSet, FileEntry, FileTree, Instruction, Journal, JournalRecord, RenameDetection,
    Side, TreeNode,
};
use std::collections::HashMap;
use std::hash::Hash;

/// Lists `replica` and classifies every path against `journal`.
///
/// # Errors
///
/// Fails only if the replica cannot be listed at all. Per-path problems
/// become `Error` nodes.
pub fn detect(
    replica: &dyn Replica,
    side: Side,
    journal: &Journal,
    excludes: &ExcludeSet,
    options: &DetectOptions,
) -> SyncResult<FileTree> {
    let listing = replica.list(excludes)?;
    let mut tree = FileTree::from_listing(listing, excludes);

    for node in tree.iter_mut() {
        node.base = journal.lookup(&node.path).cloned();
        if matches!(node.instruction, Instruction::Ignore | Instruction::Error) {
            continue;
        }
        classify(replica, side, node);
    }

    add_ghosts(&mut tree, journal, excludes);

    if options.rename_detection != RenameDetection::Disabled {
        pair_renames(replica, side, &mut tree, options.rename_detection);
    }

    let changed = tree.iter().filter(|n| n.instruction.is_change()).count();
    tracing::info!(
        side = %side,
        replica = %replica.describe(),
        paths = tree.len(),
        changed,
        "update detection finished"
    );
    Ok(tree)
}

fn classify(replica: &dyn Replica, side: Side, node: &mut TreeNode) {
    let (Some(entry), Some(base)) = (&node.entry, &node.base) else {
        node.instruction = Instruction::New;
        return;
    };

    let instruction = if entry.entry_type != base.entry_type {
        Instruction::Evil
    } else if entry.entry_type.is_dir() {
        Instruction::None
    } else if entry.size != base.size {
        Instruction::Modified
    } else if entry.mtime == base.stamp(side).mtime {
        if entry.mode != base.mode && entry.entry_type != EntryType::Symlink {
            Instruction::Evil
        } else {
            Instruction::None
        }
    } else {
        match base.checksum {
            None => Instruction::Modified,
            Some(recorded) => match content_checksum(replica, &entry.path, entry.entry_type) {
                Ok(current) if current == recorded => Instruction::Evil,
                Ok(current) => {
                    if let Some(entry) = node.entry.as_mut() {
                        entry.checksum = Some(current);
                    }
                    Instruction::Modified
                }
                Err(err) => {
                    tracing::warn!(path = %node.path, error = %err, "checksum failed during detection");
                    node.error = Some(err.to_string());
                    Instruction::Error
                }
            },
        }
    };

    if instruction == Instruction::Evil {
        if let Some(entry) = node.entry.as_mut() {
            if entry.entry_type == base.entry_type {
                entry.checksum = base.checksum;
            }
        }
    }

    tracing::trace!(side = %side, path = %node.path, %instruction, "classified");
    node.instruction = instruction;
}

fn add_ghosts(tree: &mut FileTree, journal: &Journal, excludes: &ExcludeSet) {
    let mut ghosts = Vec::new();
    for record in journal.records() {
        if tree.contains(&record.path) {
            continue;
        }
        let shadowed = path::ancestors(&record.path).any(|ancestor| {
            tree.get(ancestor).is_some_and(|n| {
                matches!(n.instruction, Instruction::Ignore | Instruction::Error)
            })
        });
        if shadowed {
            continue;
        }

        let mut ghost = TreeNode::ghost(record.clone());
        ghost.instruction = if excludes.is_excluded_entry(&record.path, record.entry_type.is_dir()) {
            Instruction::Ignore
        } else {
            Instruction::Deleted
        };
        ghosts.push(ghost);
    }

    for ghost in ghosts {
        tree.insert(ghost);
    }
}

/// Pairs `Deleted` ghosts with `New` entries that are the same object.
///
/// A pair needs matching type, size and mtime, and an identity key that is
/// unique among ghosts and among candidates. Anything ambiguous stays
/// `Deleted` + `New`.
fn pair_renames(replica: &dyn Replica, side: Side, tree: &mut FileTree, mode: RenameDetection) {
    let ghosts: Vec<JournalRecord> = tree
        .iter()
        .filter(|n| n.instruction == Instruction::Deleted && !n.is_dir())
        .filter_map(|n| n.base.clone())
        .collect();
    if ghosts.is_empty() {
        return;
    }
    let candidates: Vec<FileEntry> = tree
        .iter()
        .filter(|n| n.instruction == Instruction::New && n.base.is_none())
        .filter_map(|n| n.entry.clone())
        .filter(|e| !e.entry_type.is_dir())
        .collect();
    if candidates.is_empty() {
        return;
    }

    let mut pairs = Vec::new();

    if replica.capabilities().stable_inodes {
        pairs.extend(unique_pairs(
            ghosts.iter().filter_map(|g| g.stamp(side).identity().map(|id| (id, g))),
            candidates.iter().filter_map(|c| c.identity().map(|id| (id, c))),
            side,
        ));
    }

    if mode == RenameDetection::InodeOrContent {
        let paired: Vec<&str> = pairs.iter().map(|(g, _): &(String, String)| g.as_str()).collect();
        let open_ghosts: Vec<&JournalRecord> = ghosts
            .iter()
            .filter(|g| !paired.contains(&g.path.as_str()) && g.checksum.is_some())
            .collect();
        let taken: Vec<&str> = pairs.iter().map(|(_, c)| c.as_str()).collect();

        let mut hashed = Vec::new();
        for candidate in &candidates {
            if taken.contains(&candidate.path.as_str()) {
                continue;
            }
            let plausible = open_ghosts.iter().any(|g| {
                g.size == candidate.size
                    && g.entry_type == candidate.entry_type
                    && g.stamp(side).mtime == candidate.mtime
            });
            if !plausible {
                continue;
            }
            match content_checksum(replica, &candidate.path, candidate.entry_type) {
                Ok(sum) => hashed.push((sum, candidate)),
                Err(err) => {
                    tracing::debug!(path = %candidate.path, error = %err, "skipping rename candidate");
                }
            }
        }

        let content_pairs = unique_pairs(
            open_ghosts.iter().filter_map(|g| g.checksum.map(|sum| (sum, *g))),
            hashed.into_iter(),
            side,
        );
        pairs.extend(content_pairs);
    }

    for (from, to) in pairs {
        tracing::debug!(side = %side, from = %from, to = %to, "rename detected");
        let checksum = tree.get(&from).and_then(|n| n.base.as_ref()).and_then(|b| b.checksum);
        if let Some(ghost) = tree.get_mut(&from) {
            ghost.instruction = Instruction::Rename;
            ghost.rename_to = Some(to.clone());
        }
        if let Some(node) = tree.get_mut(&to) {
            node.instruction = Instruction::Rename;
            node.rename_from = Some(from);
            if let Some(entry) = node.entry.as_mut() {
                entry.checksum = checksum;
            }
        }
    }
}

/// Joins ghosts and candidates on `key`, keeping only keys that occur once
/// on each side and whose metadata matches.
fn unique_pairs<'a, K, G, C>(ghosts: G, candidates: C, side: Side) -> Vec<(String, String)>
where
    K: Eq + Hash,
    G: Iterator<Item = (K, &'a JournalRecord)>,
    C: Iterator<Item = (K, &'a FileEntry)>,
{
    let mut by_key: HashMap<K, (Vec<&JournalRecord>, Vec<&FileEntry>)> = HashMap::new();
    for (key, ghost) in ghosts {
        by_key.entry(key).or_default().0.push(ghost);
    }
    for (key, candidate) in candidates {
        if let Some(slot) = by_key.get_mut(&key) {
            slot.1.push(candidate);
        }
    }

    let mut pairs: Vec<(String, String)> = by_key
        .into_values()
        .filter_map(|(ghosts, candidates)| match (ghosts.as_slice(), candidates.as_slice()) {
            ([ghost], [candidate])
                if ghost.entry_type == candidate.entry_type
                    && ghost.size == candidate.size
                    && ghost.stamp(side).mtime == candidate.mtime =>
            {
                Some((ghost.path.clone(), candidate.path.clone()))
            }
            _ => None,
        })
        .collect();
    pairs.sort();
    pairs
}
