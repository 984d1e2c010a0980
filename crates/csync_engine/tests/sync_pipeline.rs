//! End-to-end pipeline tests over in-memory replicas.

use csync_core::{ExcludeSet, Instruction, Journal, Side};
use csync_engine::{
    detect, reconcile, ActionKind, ConflictKind, DetectOptions, FaultOp, MemoryReplica, Propagator,
    RunStatus, SyncConfig,
};
use csync_testkit::prelude::*;

fn journal(pair: &MemoryPair) -> Journal {
    Journal::open(&pair.config_dir().join("csync_journal.db")).unwrap()
}

#[test]
fn second_run_is_quiet() {
    let pair = MemoryPair::new();
    pair.local.put_file("docs/readme.md", "# hi", 1_000);
    pair.local.put_file("src/main.rs", "fn main() {}", 1_000);
    pair.remote.put_file("assets/logo.svg", "<svg/>", 1_000);
    pair.local.put_symlink("latest", "docs/readme.md", 1_000);

    assert_success(&pair.sync());
    assert_converged(&pair.local, &pair.remote);

    let mut ctx = pair.context(pair.config());
    ctx.init().unwrap();
    ctx.update().unwrap();
    let plan = ctx.reconcile().unwrap();
    assert!(plan.is_empty());
    assert!(plan.instructions().values().all(|i| *i == Instruction::None));
    assert_quiet(&ctx.propagate().unwrap());
    ctx.destroy().unwrap();
}

#[test]
fn one_sided_changes_converge() {
    let pair = MemoryPair::new();
    pair.local.put_file("a.txt", "one", 1_000);
    pair.local.put_file("b.txt", "two", 1_000);
    pair.local.put_file("c.txt", "three", 1_000);
    assert_success(&pair.sync());

    pair.local.edit_file("a.txt", "one, edited", 2_000);
    pair.remote.delete("b.txt");
    pair.remote.put_file("new/d.txt", "four", 2_000);
    pair.remote.touch("c.txt", 2_500);

    let report = pair.sync();
    assert_success(&report);
    assert_converged(&pair.local, &pair.remote);
    assert_eq!(pair.local.entry("c.txt").unwrap().mtime, 2_500);

    let journal = journal(&pair);
    assert!(journal.lookup("b.txt").is_none());
    let a = journal.lookup("a.txt").unwrap();
    assert_eq!(a.size, 11);
    assert_eq!(a.stamp(Side::Local).mtime, 2_000);
    assert_eq!(a.stamp(Side::Remote).mtime, 2_000);

    assert_quiet(&pair.sync());
}

#[test]
fn remote_modification_scenario() {
    let pair = MemoryPair::new();
    pair.local.put_file("a.txt", "0123456789", 1_000);
    assert_success(&pair.sync());

    pair.remote.edit_file("a.txt", "0123456789ab", 1_500);

    let mut journal = journal(&pair);
    let base = journal.lookup("a.txt").unwrap().clone();
    assert_eq!((base.size, base.mtime), (10, 1_000));

    let excludes = ExcludeSet::new();
    let options = DetectOptions::default();
    let local_tree = detect(pair.local.as_ref(), Side::Local, &journal, &excludes, &options).unwrap();
    let remote_tree = detect(pair.remote.as_ref(), Side::Remote, &journal, &excludes, &options).unwrap();
    assert_eq!(local_tree.get("a.txt").unwrap().instruction, Instruction::None);
    assert_eq!(remote_tree.get("a.txt").unwrap().instruction, Instruction::Modified);

    let plan = reconcile(&local_tree, &remote_tree);
    assert_eq!(plan.actions().len(), 1);
    assert_eq!(plan.actions()[0].kind, ActionKind::Copy { from: Side::Remote });
    assert_eq!(plan.instruction("a.txt"), Some(Instruction::Modified));

    let config = SyncConfig::new();
    let outcome = Propagator::new(pair.local.as_ref(), pair.remote.as_ref(), &mut journal, &config).run(&plan);
    assert!(outcome.errors.is_empty());

    assert_eq!(pair.local.content("a.txt").unwrap(), b"0123456789ab");
    let record = journal.lookup("a.txt").unwrap();
    assert_eq!(record.size, 12);
    assert_eq!(record.stamp(Side::Local).mtime, 1_500);
    assert_eq!(record.stamp(Side::Remote).mtime, 1_500);
}

#[test]
fn local_delete_scenario() {
    let pair = MemoryPair::new();
    pair.local.put_file("b.txt", "bye", 1_000);
    assert_success(&pair.sync());

    pair.local.delete("b.txt");
    let mut ctx = pair.context(pair.config());
    ctx.init().unwrap();
    ctx.update().unwrap();
    let plan = ctx.reconcile().unwrap();
    assert_eq!(plan.instruction("b.txt"), Some(Instruction::Deleted));
    assert_success(&ctx.propagate().unwrap());
    assert!(ctx.journal().unwrap().lookup("b.txt").is_none());
    ctx.destroy().unwrap();

    assert!(!pair.remote.exists("b.txt"));
}

#[test]
fn edit_edit_conflict_keeps_everything() {
    let pair = MemoryPair::new();
    pair.local.put_file("plan.txt", "v1", 1_000);
    assert_success(&pair.sync());

    pair.local.edit_file("plan.txt", "local v2", 2_000);
    pair.remote.edit_file("plan.txt", "remote v2", 2_000);

    let report = pair.sync();
    assert_eq!(report.status, RunStatus::Success);
    assert!(report.errors.is_empty());
    assert_eq!(report.conflicts.len(), 1);
    let conflict = &report.conflicts[0];
    assert_eq!(conflict.kind, ConflictKind::BothModified);
    let aside = conflict.aside.clone().unwrap();
    assert!(aside.starts_with("plan.conflict-") && aside.ends_with(".txt"), "{aside}");

    for replica in [&pair.local, &pair.remote] {
        assert_eq!(replica.content("plan.txt").unwrap(), b"remote v2");
        assert_eq!(replica.content(&aside).unwrap(), b"local v2");
    }
    assert_converged(&pair.local, &pair.remote);

    // Not re-reported.
    assert_quiet(&pair.sync());
}

#[test]
fn delete_edit_conflict_restores_the_edit() {
    let pair = MemoryPair::new();
    pair.local.put_file("keep.txt", "base", 1_000);
    assert_success(&pair.sync());

    pair.local.delete("keep.txt");
    pair.remote.edit_file("keep.txt", "still needed", 2_000);

    let report = pair.sync();
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].kind, ConflictKind::DeletedOn(Side::Local));
    assert_eq!(pair.local.content("keep.txt").unwrap(), b"still needed");
    assert_converged(&pair.local, &pair.remote);
    assert_quiet(&pair.sync());
}

#[test]
fn rename_is_a_single_action() {
    let pair = MemoryPair::new();
    pair.local.put_file("old/name.txt", "content that moves", 1_000);
    pair.local.put_dir("new", 1_000);
    assert_success(&pair.sync());
    let remote_inode = pair.remote.entry("old/name.txt").unwrap().inode;

    pair.local.move_path("old/name.txt", "new/name.txt").unwrap();

    let mut ctx = pair.context(pair.config());
    ctx.init().unwrap();
    ctx.update().unwrap();
    let plan = ctx.reconcile().unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(
        plan.actions()[0].kind,
        ActionKind::Rename {
            on: Side::Remote,
            from: "old/name.txt".into()
        }
    );
    assert_eq!(plan.instruction("new/name.txt"), Some(Instruction::Rename));
    let report = ctx.propagate().unwrap();
    ctx.destroy().unwrap();

    assert_success(&report);
    assert_eq!(report.stats.renamed, 1);
    assert_eq!(report.stats.copied, 0);
    assert_eq!(pair.remote.entry("new/name.txt").unwrap().inode, remote_inode);
    assert!(!pair.remote.exists("old/name.txt"));
    assert_quiet(&pair.sync());
}

#[test]
fn rename_without_stable_inodes_is_delete_and_new() {
    let pair = MemoryPair::with_replicas(
        MemoryReplica::new("local").with_device(1).with_stable_inodes(false),
        MemoryReplica::new("remote").with_device(2),
    );
    pair.local.put_file("a.txt", "payload", 1_000);
    assert_success(&pair.sync());

    pair.local.move_path("a.txt", "b.txt").unwrap();
    let report = pair.sync();
    assert_success(&report);
    assert_eq!(report.stats.renamed, 0);
    assert_eq!(report.stats.copied, 1);
    assert_eq!(report.stats.deleted, 1);
    assert_converged(&pair.local, &pair.remote);
}

#[test]
fn failure_on_one_path_does_not_stop_others() {
    let pair = MemoryPair::new();
    pair.local.put_file("a.txt", "A", 1_000);
    pair.local.put_file("b.txt", "B", 1_000);
    pair.remote.inject_fault(
        FaultOp::Write,
        "a.txt",
        std::io::ErrorKind::PermissionDenied,
        None,
    );

    let report = pair.sync();
    assert_eq!(report.status, RunStatus::PartialSuccess);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].path, "a.txt");

    let journal = journal(&pair);
    assert!(journal.lookup("a.txt").is_none());
    assert!(journal.lookup("b.txt").is_some());
    assert_eq!(pair.remote.content("b.txt").unwrap(), b"B");

    pair.remote.clear_faults();
    assert_success(&pair.sync());
    assert_converged(&pair.local, &pair.remote);
}

#[test]
fn deleted_directory_with_changed_content_survives() {
    let pair = MemoryPair::new();
    pair.local.put_file("project/notes.txt", "notes", 1_000);
    pair.local.put_file("project/old.txt", "old", 1_000);
    assert_success(&pair.sync());

    pair.local.delete("project");
    pair.remote.put_file("project/added.txt", "added remotely", 2_000);

    let report = pair.sync();
    assert_eq!(report.status, RunStatus::Success);
    for replica in [&pair.local, &pair.remote] {
        assert!(replica.exists("project"));
        assert_eq!(replica.content("project/added.txt").unwrap(), b"added remotely");
        assert!(!replica.exists("project/notes.txt"));
        assert!(!replica.exists("project/old.txt"));
    }
    assert_quiet(&pair.sync());
}

#[test]
fn deleted_directory_goes_away_when_untouched() {
    let pair = MemoryPair::new();
    pair.local.put_file("tmp/a", "1", 1_000);
    pair.local.put_file("tmp/sub/b", "2", 1_000);
    assert_success(&pair.sync());

    pair.remote.delete("tmp");
    assert_success(&pair.sync());
    assert!(!pair.local.exists("tmp"));
    assert!(journal(&pair).is_empty());
}

#[test]
fn type_change_replaces_the_other_copy() {
    let pair = MemoryPair::new();
    pair.local.put_file("thing", "file", 1_000);
    assert_success(&pair.sync());

    pair.local.delete("thing");
    pair.local.put_file("thing/inside.txt", "now a directory", 2_000);

    let report = pair.sync();
    assert_success(&report);
    assert_converged(&pair.local, &pair.remote);
    assert_quiet(&pair.sync());
}

#[test]
fn read_only_directories_sync_in_both_directions() {
    let pair = MemoryPair::new();
    pair.local.put_file("locked/a.txt", "a", 1_000);
    pair.local.put_file("locked/nested/b.txt", "b", 1_000);
    pair.local.chmod("locked", 0o555);
    pair.local.chmod("locked/nested", 0o500);

    assert_success(&pair.sync());
    assert_converged(&pair.local, &pair.remote);
    assert_eq!(pair.remote.entry("locked").unwrap().mode, 0o555);
    assert_eq!(pair.remote.entry("locked/nested").unwrap().mode, 0o500);

    pair.remote.edit_file("locked/nested/b.txt", "b, edited", 2_000);
    pair.remote.put_file("locked/c.txt", "c", 2_000);
    let report = pair.sync();
    assert_success(&report);
    assert_converged(&pair.local, &pair.remote);
    assert_eq!(pair.local.entry("locked").unwrap().mode, 0o555);
    assert_eq!(pair.local.entry("locked/nested").unwrap().mode, 0o500);

    assert_quiet(&pair.sync());
}

#[test]
fn excluded_paths_are_left_alone() {
    let pair = MemoryPair::new();
    std::fs::write(pair.config_dir().join("csync_exclude.conf"), "build/\n*.log\n").unwrap();
    pair.local.put_file("build/out.bin", "bin", 1_000);
    pair.local.put_file("run.log", "log", 1_000);
    pair.local.put_file("src/lib.rs", "lib", 1_000);
    pair.remote.put_file("remote.log", "remote log", 1_000);

    assert_success(&pair.sync());
    assert!(!pair.remote.exists("build"));
    assert!(!pair.remote.exists("run.log"));
    assert!(!pair.local.exists("remote.log"));
    assert!(pair.remote.exists("src/lib.rs"));
}
