//! Randomised convergence checks.

use csync_core::EntryType;
use csync_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeSet;

const BASE_MTIME: i64 = 1_000;
const LOCAL_MTIME: i64 = 2_000;
const REMOTE_MTIME: i64 = 2_001;

/// File contents that differ from the synced baseline.
fn changed_contents(before: &Snapshot, after: &Snapshot) -> BTreeSet<Vec<u8>> {
    after
        .iter()
        .filter(|(_, (t, _))| *t == EntryType::File)
        .filter(|(path, value)| before.get(*path) != Some(*value))
        .filter_map(|(_, (_, content))| content.clone())
        .collect()
}

fn all_contents(snapshot: &Snapshot) -> BTreeSet<Vec<u8>> {
    snapshot.values().filter_map(|(_, content)| content.clone()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn initial_sync_copies_everything(tree in tree_strategy()) {
        let pair = MemoryPair::new();
        populate(&pair.local, &tree, BASE_MTIME);

        let report = pair.sync();
        prop_assert!(report.errors.is_empty());
        prop_assert!(report.conflicts.is_empty());
        assert_converged(&pair.local, &pair.remote);
        assert_quiet(&pair.sync());
    }

    #[test]
    fn concurrent_edits_converge_without_losing_changes(
        tree in tree_strategy(),
        local_edits in edits_strategy(6),
        remote_edits in edits_strategy(6),
    ) {
        let pair = MemoryPair::new();
        populate(&pair.local, &tree, BASE_MTIME);
        assert_success(&pair.sync());
        let baseline = snapshot(&pair.local);

        for edit in &local_edits {
            apply_edit(&pair.local, edit, LOCAL_MTIME);
        }
        for edit in &remote_edits {
            apply_edit(&pair.remote, edit, REMOTE_MTIME);
        }
        let mut expected = changed_contents(&baseline, &snapshot(&pair.local));
        expected.extend(changed_contents(&baseline, &snapshot(&pair.remote)));

        let report = pair.sync();
        prop_assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
        prop_assert!(report.fatal.is_none());
        assert_converged(&pair.local, &pair.remote);

        let kept = all_contents(&snapshot(&pair.local));
        for content in &expected {
            prop_assert!(kept.contains(content), "lost content {:?}", content);
        }

        assert_quiet(&pair.sync());
    }
}
