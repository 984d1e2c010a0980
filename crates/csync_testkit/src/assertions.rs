//! Convergence and report assertions.

use csync_core::EntryType;
use csync_engine::{MemoryReplica, RunReport, RunStatus};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Type and content of every path in a replica.
pub type Snapshot = BTreeMap<String, (EntryType, Option<Vec<u8>>)>;

/// Captures a memory replica.
pub fn snapshot(replica: &MemoryReplica) -> Snapshot {
    replica
        .paths()
        .into_iter()
        .filter_map(|p| {
            let entry = replica.entry(&p)?;
            let content = replica.content(&p);
            Some((p, (entry.entry_type, content)))
        })
        .collect()
}

/// Captures a directory on disk (files and directories only).
pub fn disk_snapshot(root: &Path) -> Snapshot {
    fn walk(root: &Path, dir: &Path, out: &mut Snapshot) {
        let mut entries: Vec<_> = fs::read_dir(dir)
            .expect("Failed to read fixture directory")
            .map(|e| e.expect("Failed to read directory entry").path())
            .collect();
        entries.sort();
        for path in entries {
            let relative = path
                .strip_prefix(root)
                .expect("Entry outside root")
                .to_string_lossy()
                .replace('\\', "/");
            if path.is_dir() {
                out.insert(relative, (EntryType::Directory, None));
                walk(root, &path, out);
            } else {
                let content = fs::read(&path).expect("Failed to read fixture file");
                out.insert(relative, (EntryType::File, Some(content)));
            }
        }
    }

    let mut out = Snapshot::new();
    walk(root, root, &mut out);
    out
}

fn describe_difference(left: &Snapshot, right: &Snapshot) -> String {
    let mut lines = Vec::new();
    for (path, value) in left {
        match right.get(path) {
            None => lines.push(format!("  only on local:  {path}")),
            Some(other) if other != value => lines.push(format!("  differs:        {path}")),
            Some(_) => {}
        }
    }
    for path in right.keys().filter(|p| !left.contains_key(*p)) {
        lines.push(format!("  only on remote: {path}"));
    }
    lines.join("\n")
}

/// Asserts that two snapshots hold the same paths, types and content.
pub fn assert_snapshots_equal(local: &Snapshot, remote: &Snapshot) {
    assert!(
        local == remote,
        "replicas diverge:\n{}",
        describe_difference(local, remote)
    );
}

/// Asserts that two memory replicas hold the same paths, types and content.
pub fn assert_converged(local: &MemoryReplica, remote: &MemoryReplica) {
    assert_snapshots_equal(&snapshot(local), &snapshot(remote));
}

/// Asserts that two directories hold the same paths and content.
pub fn assert_disk_converged(local: &Path, remote: &Path) {
    assert_snapshots_equal(&disk_snapshot(local), &disk_snapshot(remote));
}

/// Serializes a report for diagnostics.
pub fn report_json(report: &RunReport) -> serde_json::Value {
    serde_json::to_value(report).expect("Failed to serialize report")
}

/// Asserts a fully successful run.
pub fn assert_success(report: &RunReport) {
    assert_eq!(
        report.status,
        RunStatus::Success,
        "run was not successful:\n{:#}",
        report_json(report)
    );
}

/// Asserts a successful run that had nothing to do.
pub fn assert_quiet(report: &RunReport) {
    assert_success(report);
    assert_eq!(
        report.stats.actions,
        0,
        "expected no actions:\n{:#}",
        report_json(report)
    );
}
