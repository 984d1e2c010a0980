//! On-disk journal recovery tests.

use csync_core::journal::frame::{self, Frame};
use csync_core::{FileEntry, Journal, JournalRecord, JournalState};
use proptest::prelude::*;
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::tempdir;

fn record(path: &str, size: u64, mtime: i64) -> JournalRecord {
    let local = FileEntry::file(path, size, mtime).with_identity(size + 1, 7);
    let remote = FileEntry::file(path, size, mtime + 1).with_identity(size + 2, 8);
    JournalRecord::from_entries(&local, &remote, None)
}

#[test]
fn journal_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(".csync/csync_journal.db");

    {
        let mut journal = Journal::open(&path).unwrap();
        assert_eq!(journal.state(), &JournalState::Fresh);
        journal.upsert(record("a.txt", 1, 100));
        journal.upsert(record("docs/b.txt", 2, 200));
        journal.commit().unwrap();
    }

    let journal = Journal::open(&path).unwrap();
    assert_eq!(journal.state(), &JournalState::Loaded);
    assert_eq!(journal.len(), 2);
    let b = journal.lookup("docs/b.txt").unwrap();
    assert_eq!(b.remote_mtime, 201);
}

#[test]
fn truncated_tail_after_crash_is_dropped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("csync_journal.db");

    {
        let mut journal = Journal::open(&path).unwrap();
        journal.upsert(record("kept", 1, 1));
        journal.commit().unwrap();
    }

    // Half a frame, as left by a crash in the middle of an append.
    let frame = Frame::Upsert(record("lost", 2, 2)).encode().unwrap();
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&frame[..frame.len() - 5]).unwrap();
    drop(file);

    let mut journal = Journal::open(&path).unwrap();
    assert!(matches!(journal.state(), JournalState::Recovered { .. }));
    assert!(journal.lookup("kept").is_some());
    assert!(journal.lookup("lost").is_none());

    journal.upsert(record("after", 3, 3));
    journal.commit().unwrap();
    drop(journal);

    let journal = Journal::open(&path).unwrap();
    assert_eq!(journal.state(), &JournalState::Loaded);
    assert_eq!(journal.len(), 2);
}

#[test]
fn garbage_file_degrades_then_rewrites() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("csync_journal.db");
    std::fs::write(&path, b"this is not a journal at all, not even close").unwrap();

    let mut journal = Journal::open(&path).unwrap();
    assert!(journal.state().is_degraded());
    assert!(journal.is_empty());

    journal.upsert(record("fresh", 1, 1));
    journal.commit().unwrap();
    drop(journal);

    let journal = Journal::open(&path).unwrap();
    assert_eq!(journal.state(), &JournalState::Loaded);
    assert_eq!(journal.generation(), 1);
    assert_eq!(journal.len(), 1);
}

fn arb_path() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{1,4}", 1..4).prop_map(|parts| parts.join("/"))
}

#[derive(Debug, Clone)]
enum Op {
    Upsert(String, u64),
    Remove(String),
    Commit,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (arb_path(), 0u64..1000).prop_map(|(p, s)| Op::Upsert(p, s)),
        arb_path().prop_map(Op::Remove),
        Just(Op::Commit),
    ]
}

proptest! {
    #[test]
    fn reload_matches_committed_state(ops in prop::collection::vec(arb_op(), 0..40)) {
        let log = csync_storage::MemoryLog::new();
        let mut journal = Journal::with_backend(Box::new(log.clone())).unwrap();
        let mut committed = journal.snapshot();

        for op in ops {
            match op {
                Op::Upsert(path, size) => journal.upsert(record(&path, size, 1)),
                Op::Remove(path) => {
                    journal.remove(&path);
                }
                Op::Commit => {
                    journal.commit().unwrap();
                    committed = journal.snapshot();
                }
            }
        }

        let reloaded = Journal::with_backend(Box::new(log)).unwrap();
        prop_assert_eq!(reloaded.snapshot(), committed);
    }

    #[test]
    fn any_prefix_replays_without_corruption(cut in 0usize..400) {
        let frames = vec![
            Frame::Generation(1),
            Frame::Upsert(record("a/b", 10, 5)),
            Frame::Remove("a/b".to_string()),
            Frame::Upsert(record("c", 3, 9)),
        ];
        let bytes: Vec<u8> = frames.iter().flat_map(|f| f.encode().unwrap()).collect();
        let cut = cut.min(bytes.len());

        let replay = frame::replay(&bytes[..cut]).unwrap();
        prop_assert_eq!(replay.valid_len + replay.torn_tail, cut as u64);
        prop_assert!(replay.frames.len() <= frames.len());
        prop_assert_eq!(&frames[..replay.frames.len()], &replay.frames[..]);
    }
}
