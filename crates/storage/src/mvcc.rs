//! Multi-version storage for MVCC-TO: a descending-by-`version_id` chain
//! per key, each version carrying the youngest transaction that has read it.

use std::sync::atomic::{AtomicU64, Ordering};

use ccstore_core::{Key, Value};
use parking_lot::{RwLock, RwLockWriteGuard};

/// One installed version of a key: the value a writer left behind, the id
/// of the transaction that installed it, and the largest transaction id
/// that has since read it.
pub struct Version {
    /// The value this version holds.
    pub value: Value,
    /// The id of the transaction that installed this version.
    pub version_id: u64,
    max_read_id: AtomicU64,
}

impl Version {
    fn init() -> Self {
        Self {
            value: 0,
            version_id: 0,
            max_read_id: AtomicU64::new(0),
        }
    }

    /// The largest transaction id observed reading this version so far.
    pub fn max_read_id(&self) -> u64 {
        self.max_read_id.load(Ordering::Acquire)
    }
}

/// A key's version chain, newest (largest `version_id`) first.
pub type VersionChain = Vec<Version>;

fn readable_version(chain: &VersionChain, txn_id: u64) -> &Version {
    chain
        .iter()
        .find(|v| v.version_id <= txn_id)
        .expect("init version has version_id 0, satisfying every txn_id")
}

/// Mapping key to version chain, one `RwLock` per key.
///
/// Reads only need a shared guard: the value and `version_id` of an
/// existing version never change once installed, and `max_read_id` is
/// bumped through an atomic rather than requiring exclusive access.
/// Installing a new version, and the `CheckWrite` that precedes it, need
/// the exclusive guard, held across both so no reader can see a chain
/// between being checked and being extended.
pub struct MvccStore {
    chains: Vec<RwLock<VersionChain>>,
}

impl MvccStore {
    /// Allocate a store over `[0, keyspace_size)`, every key initialized to
    /// a single `Version(0, 0, 0)`.
    pub fn new(keyspace_size: u64) -> Self {
        let len = keyspace_size as usize;
        Self {
            chains: (0..len).map(|_| RwLock::new(vec![Version::init()])).collect(),
        }
    }

    /// Number of keys this store was sized for.
    pub fn keyspace_size(&self) -> u64 {
        self.chains.len() as u64
    }

    /// Read the version `txn_id` would see (largest `version_id` ≤
    /// `txn_id`), bumping that version's `max_read_id`.
    pub fn read(&self, key: Key, txn_id: u64) -> Value {
        let chain = self.chains[key as usize].read();
        let version = readable_version(&chain, txn_id);
        version.max_read_id.fetch_max(txn_id, Ordering::AcqRel);
        version.value
    }

    /// Take the exclusive guard for `key`'s chain, held across
    /// [`Self::check_write`] and [`Self::install`] during a write phase.
    pub fn lock_for_write(&self, key: Key) -> RwLockWriteGuard<'_, VersionChain> {
        self.chains[key as usize].write()
    }

    /// True iff no transaction younger than `txn_id` has already read the
    /// version `txn_id` would shadow.
    pub fn check_write(chain: &VersionChain, txn_id: u64) -> bool {
        readable_version(chain, txn_id).max_read_id() <= txn_id
    }

    /// Install a new version at the head of the chain.
    pub fn install(chain: &mut VersionChain, txn_id: u64, value: Value) {
        chain.insert(
            0,
            Version {
                value,
                version_id: txn_id,
                max_read_id: AtomicU64::new(txn_id),
            },
        );
    }

    /// Number of versions on `key`'s chain, including the init version.
    /// Test/diagnostic helper.
    pub fn version_count(&self, key: Key) -> usize {
        self.chains[key as usize].read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_read_sees_largest_version_at_or_below_id() {
        let store = MvccStore::new(2);
        {
            let mut chain = store.lock_for_write(1);
            MvccStore::install(&mut chain, 3, 42);
            MvccStore::install(&mut chain, 8, 99);
        }
        assert_eq!(store.read(1, 5), 42);
        assert_eq!(store.read(1, 8), 99);
        assert_eq!(store.read(1, 1), 0);
    }

    #[test]
    fn check_write_fails_after_younger_reader() {
        let store = MvccStore::new(1);
        store.read(0, 10);
        let chain = store.lock_for_write(0);
        assert!(!MvccStore::check_write(&chain, 4));
    }

    #[test]
    fn version_count_grows_by_one_per_write() {
        let store = MvccStore::new(1);
        assert_eq!(store.version_count(0), 1);
        for id in [2, 4, 6] {
            let mut chain = store.lock_for_write(0);
            MvccStore::install(&mut chain, id, id as i64);
        }
        assert_eq!(store.version_count(0), 4);
    }
}
