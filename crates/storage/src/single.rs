//! Plain single-version storage, used by Serial and the 2PL schedulers.
//!
//! Also the timestamp source OCC/P-OCC validate against: every key carries
//! a last-write timestamp drawn from a shared logical clock, and a write
//! bumps both the value and the timestamp in one critical section.

use std::sync::atomic::{AtomicU64, Ordering};

use ccstore_core::{Key, Value};
use parking_lot::Mutex;

/// Mapping key to value with a per-key last-write timestamp.
///
/// The timestamp domain is a process-wide logical clock (a strictly
/// increasing counter), not wall-clock time: the reference implementation
/// uses wall-clock timestamps and the design notes flag that a monotonic
/// clock with sufficient resolution is required for correctness, so a
/// logical clock sidesteps that requirement entirely rather than depending
/// on one.
pub struct SingleVersionStore {
    values: Vec<Mutex<Value>>,
    timestamps: Vec<AtomicU64>,
    clock: AtomicU64,
}

impl SingleVersionStore {
    /// Allocate a store over `[0, keyspace_size)`, every key initialized to
    /// value `0` with timestamp `0`.
    pub fn new(keyspace_size: u64) -> Self {
        let len = keyspace_size as usize;
        Self {
            values: (0..len).map(|_| Mutex::new(0)).collect(),
            timestamps: (0..len).map(|_| AtomicU64::new(0)).collect(),
            clock: AtomicU64::new(0),
        }
    }

    /// Number of keys this store was sized for.
    pub fn keyspace_size(&self) -> u64 {
        self.values.len() as u64
    }

    /// Advance and return the shared logical clock. Used to stamp a
    /// transaction's `occ_start_time` before it begins reading.
    pub fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Current value of `key`.
    pub fn read(&self, key: Key) -> Value {
        *self.values[key as usize].lock()
    }

    /// Install `value` at `key` and bump its timestamp to a fresh tick,
    /// returning the new timestamp.
    pub fn write(&self, key: Key, value: Value) -> u64 {
        let ts = self.tick();
        *self.values[key as usize].lock() = value;
        self.timestamps[key as usize].store(ts, Ordering::Release);
        ts
    }

    /// The timestamp of the most recent write to `key`.
    pub fn timestamp(&self, key: Key) -> u64 {
        self.timestamps[key as usize].load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn write_bumps_timestamp_past_prior_reads() {
        let store = SingleVersionStore::new(4);
        let start = store.tick();
        let write_ts = store.write(2, 42);
        assert!(write_ts > start);
        assert_eq!(store.read(2), 42);
        assert_eq!(store.timestamp(2), write_ts);
    }

    #[test]
    fn unwritten_key_reads_zero() {
        let store = SingleVersionStore::new(4);
        assert_eq!(store.read(0), 0);
        assert_eq!(store.timestamp(0), 0);
    }

    proptest::proptest! {
        /// Writing a sequence of values to one key always leaves its
        /// timestamp strictly increasing and its value equal to the last
        /// one written, whatever the sequence.
        #[test]
        fn sequential_writes_keep_timestamp_monotonic(values in proptest::collection::vec(any::<i64>(), 1..20)) {
            let store = SingleVersionStore::new(1);
            let mut last_ts = 0;
            for value in &values {
                let ts = store.write(0, *value);
                prop_assert!(ts > last_ts);
                last_ts = ts;
            }
            prop_assert_eq!(store.read(0), *values.last().unwrap());
            prop_assert_eq!(store.timestamp(0), last_ts);
        }
    }
}
