//! Clustered storage for Strife: one union-find node per key plus a pool of
//! "special" nodes materialized by the spot step of each batch.

use ccstore_core::{Key, Value};
use parking_lot::Mutex;

/// The mutable union-find bookkeeping for one cluster, guarded by a single
/// mutex so path compression and union never observe a torn update.
pub struct ClusterState {
    /// Union-find parent, an index into the owning store's address space.
    /// A cluster is a root iff `parent == self index`.
    pub parent: usize,
    /// Total order used to break union ties and to detect "special"
    /// clusters (`address > max_address`).
    pub address: u64,
    /// Size of the set this cluster currently roots.
    pub count: u64,
    /// The batch-local slot assigned to this cluster if the spot step
    /// promoted it to special, else `None`.
    pub special_id: Option<usize>,
}

/// One union-find node. Natural clusters correspond 1:1 with keys; special
/// clusters are reusable per-batch scratch nodes created by the spot step.
pub struct Cluster {
    /// The key's value, for natural clusters; unused by special clusters.
    pub value: Mutex<Value>,
    state: Mutex<ClusterState>,
}

impl Cluster {
    fn natural(index: usize) -> Self {
        Self {
            value: Mutex::new(0),
            state: Mutex::new(ClusterState {
                parent: index,
                address: index as u64,
                count: 1,
                special_id: None,
            }),
        }
    }

    fn special(index: usize) -> Self {
        Self {
            value: Mutex::new(0),
            state: Mutex::new(ClusterState {
                parent: index,
                address: index as u64,
                count: 0,
                special_id: None,
            }),
        }
    }

    /// Snapshot of this cluster's current bookkeeping.
    pub fn state(&self) -> ClusterState {
        let s = self.state.lock();
        ClusterState {
            parent: s.parent,
            address: s.address,
            count: s.count,
            special_id: s.special_id,
        }
    }

    /// Run `f` with exclusive access to this cluster's bookkeeping.
    pub fn with_state_mut<R>(&self, f: impl FnOnce(&mut ClusterState) -> R) -> R {
        f(&mut self.state.lock())
    }
}

/// Mapping key to `Cluster`, plus a reusable pool of special clusters
/// indexed contiguously after the natural ones.
///
/// A single flat index space covers both: `0..keyspace_size` are the
/// natural clusters (one per key, address equal to the key itself), and
/// `keyspace_size..keyspace_size + strife_k` are the special pool, whose
/// addresses are reassigned above `max_address()` each time the spot step
/// promotes one. This mirrors the reference design's "special clusters have
/// address > M" rule using a Vec index in place of a heap pointer value.
pub struct ClusteredStore {
    natural: Vec<Cluster>,
    special: Vec<Cluster>,
}

impl ClusteredStore {
    /// Allocate `keyspace_size` natural clusters and `strife_k` special
    /// slots.
    pub fn new(keyspace_size: u64, strife_k: usize) -> Self {
        let len = keyspace_size as usize;
        tracing::debug!(keyspace_size, strife_k, "allocating clustered store");
        Self {
            natural: (0..len).map(Cluster::natural).collect(),
            special: (0..strife_k).map(|i| Cluster::special(len + i)).collect(),
        }
    }

    /// `M` in the design notes: the highest natural address. A cluster is
    /// special iff its address is strictly greater than this.
    pub fn max_address(&self) -> u64 {
        self.natural.len() as u64 - 1
    }

    /// Number of special slots available per batch.
    pub fn special_slots(&self) -> usize {
        self.special.len()
    }

    /// Total number of addressable clusters, natural plus special.
    pub fn index_count(&self) -> usize {
        self.natural.len() + self.special.len()
    }

    /// The cluster at flat index `index`.
    pub fn cluster(&self, index: usize) -> &Cluster {
        if index < self.natural.len() {
            &self.natural[index]
        } else {
            &self.special[index - self.natural.len()]
        }
    }

    /// The natural cluster index a key maps to.
    pub fn index_of(&self, key: Key) -> usize {
        key as usize
    }

    /// Flat index of special slot `slot` (`< special_slots()`).
    pub fn special_index(&self, slot: usize) -> usize {
        self.natural.len() + slot
    }

    /// Current value at `key` (always read from the natural cluster; the
    /// union-find forest only ever redirects lookups for conflict
    /// clustering, not for the stored value itself).
    pub fn read(&self, key: Key) -> Value {
        *self.natural[key as usize].value.lock()
    }

    /// Install `value` at `key`.
    pub fn write(&self, key: Key, value: Value) {
        *self.natural[key as usize].value.lock() = value;
    }

    /// Reset the cluster at flat index `index` to its natural state: parent
    /// self-pointing, address equal to the index, and a fresh count — `1`
    /// for a natural cluster (it represents exactly one key), `0` for a
    /// special slot (it represents nothing until the spot step claims it).
    /// Indices are independent, so callers may parallelize across them.
    pub fn reset_cluster(&self, index: usize) {
        let count = if index < self.natural.len() { 1 } else { 0 };
        self.cluster(index).with_state_mut(|s| {
            s.parent = index;
            s.address = index as u64;
            s.count = count;
            s.special_id = None;
        });
    }

    /// Reset every cluster to its natural state ahead of a new batch.
    pub fn prepare_batch(&self) {
        for index in 0..self.index_count() {
            self.reset_cluster(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cluster_is_its_own_root_at_natural_address() {
        let store = ClusteredStore::new(4, 2);
        for key in 0..4 {
            let state = store.cluster(key).state();
            assert_eq!(state.parent, key);
            assert_eq!(state.address, key as u64);
        }
        assert_eq!(store.max_address(), 3);
    }

    #[test]
    fn prepare_batch_restores_natural_state_after_mutation() {
        let store = ClusteredStore::new(3, 1);
        store.cluster(0).with_state_mut(|s| {
            s.parent = 2;
            s.address = 99;
            s.count = 5;
        });
        store.prepare_batch();
        let state = store.cluster(0).state();
        assert_eq!(state.parent, 0);
        assert_eq!(state.address, 0);
        assert_eq!(state.count, 1);
    }

    #[test]
    fn special_slots_sit_above_natural_addresses() {
        let store = ClusteredStore::new(4, 2);
        assert_eq!(store.special_index(0), 4);
        assert_eq!(store.special_index(1), 5);
        assert_eq!(store.index_count(), 6);
    }
}
