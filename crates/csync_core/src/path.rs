//! Replica-relative path helpers.
//!
//! Paths inside a replica are UTF-8, `/`-separated, relative to the replica
//! root, and never contain empty, `.` or `..` components. The root itself is
//! never part of a tree.

use crate::error::{CoreError, CoreResult};

/// Normalizes a relative path: converts `\` to `/`, drops empty and `.`
/// components, and rejects `..` and the empty result.
///
/// # Errors
///
/// Returns [`CoreError::InvalidPath`] if the path escapes the root or
/// names the root itself.
pub fn normalize(path: &str) -> CoreResult<String> {
    let mut parts = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => return Err(CoreError::invalid_path(path, "parent component")),
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(CoreError::invalid_path(path, "empty path"));
    }
    Ok(parts.join("/"))
}

/// Returns the parent path, or `None` for a top-level entry.
#[must_use]
pub fn parent(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

/// Returns the last path component.
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.rfind('/').map_or(path, |idx| &path[idx + 1..])
}

/// Joins a parent path and a component.
#[must_use]
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Number of components in the path.
#[must_use]
pub fn depth(path: &str) -> usize {
    path.split('/').count()
}

/// Returns true if `ancestor` is a strict ancestor of `path`.
#[must_use]
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Iterates over the strict ancestors of `path`, nearest first.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(parent(path), |p| parent(*p))
}

/// Exclusive upper bound of the key range holding every descendant of
/// `path` in a map sorted by path: descendants are exactly the keys in
/// `path + "/" .. path + "0"` because `'0'` follows `'/'` in ASCII.
#[must_use]
pub fn descendant_range(path: &str) -> (String, String) {
    (format!("{path}/"), format!("{path}0"))
}
