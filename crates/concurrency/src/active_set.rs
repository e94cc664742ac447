//! The mutex-protected active-validator registry P-OCC snapshots against.

use std::collections::BTreeSet;

use ccstore_core::Key;
use parking_lot::Mutex;

/// One validating transaction's declared access sets, as seen by a
/// concurrent validator's snapshot.
#[derive(Debug, Clone)]
pub struct ActiveEntry {
    /// The validating transaction's id.
    pub txn_id: u64,
    /// Its read set.
    pub readset: BTreeSet<Key>,
    /// Its write set.
    pub writeset: BTreeSet<Key>,
}

/// The set of transactions currently between entering validation and
/// finishing it (commit or restart).
///
/// [`Self::snapshot_and_insert`] is the single atomic critical section every
/// P-OCC validator passes through: it returns every entry that was already
/// present *before* the caller's own entry goes in, so any two concurrent
/// validators are guaranteed to see each other in at least one direction.
#[derive(Default)]
pub struct ActiveSet {
    entries: Mutex<Vec<ActiveEntry>>,
}

impl ActiveSet {
    /// An empty active set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current entries, then insert `entry`, in one critical
    /// section. The returned snapshot does not include `entry` itself.
    pub fn snapshot_and_insert(&self, entry: ActiveEntry) -> Vec<ActiveEntry> {
        let mut guard = self.entries.lock();
        let snapshot = guard.clone();
        guard.push(entry);
        snapshot
    }

    /// Remove `txn_id` from the active set once it has committed or
    /// restarted.
    pub fn remove(&self, txn_id: u64) {
        let mut guard = self.entries.lock();
        guard.retain(|e| e.txn_id != txn_id);
    }

    /// Current number of active validators. Test/diagnostic helper.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the active set is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, writes: &[Key]) -> ActiveEntry {
        ActiveEntry {
            txn_id: id,
            readset: BTreeSet::new(),
            writeset: writes.iter().copied().collect(),
        }
    }

    #[test]
    fn snapshot_excludes_self_but_includes_prior_entries() {
        let set = ActiveSet::new();
        let first = set.snapshot_and_insert(entry(1, &[10]));
        assert!(first.is_empty());
        let second = set.snapshot_and_insert(entry(2, &[20]));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].txn_id, 1);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn remove_drops_only_the_named_entry() {
        let set = ActiveSet::new();
        set.snapshot_and_insert(entry(1, &[1]));
        set.snapshot_and_insert(entry(2, &[2]));
        set.remove(1);
        assert_eq!(set.len(), 1);
        let snapshot = set.snapshot_and_insert(entry(3, &[3]));
        assert_eq!(snapshot.iter().map(|e| e.txn_id).collect::<Vec<_>>(), vec![2]);
    }
}
