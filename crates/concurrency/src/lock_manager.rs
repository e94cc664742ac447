//! Per-key FIFO lock queues for the two 2PL variants.
//!
//! Both managers are mutated only from the scheduler thread: workers never
//! touch a lock table directly, they only push completion notices onto
//! `completed_txns` (see [`crate::scheduler`]). That single-writer discipline
//! is why neither type below reaches for a `Mutex` or an atomic anywhere —
//! plain `VecDeque`s and a `HashMap` are enough.

use std::collections::{HashMap, VecDeque};

use ccstore_core::Key;

/// The mode a lock request was made in. Only meaningful for
/// [`LockManagerB`]; [`LockManagerA`] treats every request as exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Compatible with other `Shared` holders, incompatible with `Exclusive`.
    Shared,
    /// Incompatible with every other holder.
    Exclusive,
}

/// Exclusive-only lock manager backing 2PL-X.
///
/// Every request — read or write — takes the same exclusive slot in a key's
/// queue; there is no shared mode to reason about, so release only ever
/// wakes the single successor at the new head.
#[derive(Debug, Default)]
pub struct LockManagerA {
    queues: Vec<VecDeque<u64>>,
    remaining_waits: HashMap<u64, u32>,
}

impl LockManagerA {
    /// A manager sized for `keyspace_size` keys, all queues empty.
    pub fn new(keyspace_size: u64) -> Self {
        Self {
            queues: (0..keyspace_size).map(|_| VecDeque::new()).collect(),
            remaining_waits: HashMap::new(),
        }
    }

    fn request(&mut self, txn: u64, key: Key) -> bool {
        let queue = &mut self.queues[key as usize];
        let granted = queue.is_empty();
        queue.push_back(txn);
        if !granted {
            *self.remaining_waits.entry(txn).or_insert(0) += 1;
        }
        granted
    }

    /// Request an exclusive lock on `key` on behalf of `txn`. Returns
    /// whether it was granted immediately.
    pub fn write_lock(&mut self, txn: u64, key: Key) -> bool {
        self.request(txn, key)
    }

    /// Identical to [`Self::write_lock`]: mode A takes exclusive locks for
    /// reads too.
    pub fn read_lock(&mut self, txn: u64, key: Key) -> bool {
        self.request(txn, key)
    }

    /// Release `txn`'s lock on `key`, which must be the current head of
    /// `key`'s queue. Returns the successor transaction if this release
    /// brought its `remaining_waits` counter to zero.
    pub fn release(&mut self, txn: u64, key: Key) -> Option<u64> {
        let queue = &mut self.queues[key as usize];
        debug_assert_eq!(queue.front().copied(), Some(txn));
        queue.pop_front();
        let successor = *queue.front()?;
        let waits = self.remaining_waits.get_mut(&successor)?;
        *waits -= 1;
        if *waits == 0 {
            self.remaining_waits.remove(&successor);
            return Some(successor);
        }
        None
    }

    /// Withdraw a request that was enqueued but never granted — used when a
    /// multi-key admission attempt backs out after a later key was denied.
    pub fn cancel_wait(&mut self, txn: u64, key: Key) {
        let queue = &mut self.queues[key as usize];
        if let Some(pos) = queue.iter().position(|&id| id == txn) {
            queue.remove(pos);
        }
        self.remaining_waits.remove(&txn);
    }

    /// The current head of `key`'s queue, if any.
    pub fn holder(&self, key: Key) -> Option<u64> {
        self.queues[key as usize].front().copied()
    }
}

struct Request {
    txn: u64,
    mode: LockMode,
    granted: bool,
}

/// Shared/exclusive lock manager backing 2PL-SX.
///
/// A request is grantable iff no `Exclusive` request precedes it anywhere
/// in its key's queue — evaluated both when a request first arrives and
/// again, for whatever remains, after any release.
#[derive(Default)]
pub struct LockManagerB {
    queues: Vec<VecDeque<Request>>,
    remaining_waits: HashMap<u64, u32>,
}

impl LockManagerB {
    /// A manager sized for `keyspace_size` keys, all queues empty.
    pub fn new(keyspace_size: u64) -> Self {
        Self {
            queues: (0..keyspace_size).map(|_| VecDeque::new()).collect(),
            remaining_waits: HashMap::new(),
        }
    }

    /// Re-evaluate grants for `queue` from the front. A `Shared` entry is
    /// granted as soon as it is reached (nothing `Exclusive` can precede it
    /// without having stopped the scan already); an `Exclusive` entry is
    /// granted only if it is the very first remaining entry, and the scan
    /// always stops at the first `Exclusive` it sees, granted or not,
    /// since everything behind it is blocked either way.
    fn regrant(queue: &mut VecDeque<Request>) -> Vec<u64> {
        let mut newly_granted = Vec::new();
        for (pos, req) in queue.iter_mut().enumerate() {
            match req.mode {
                LockMode::Shared => {
                    if !req.granted {
                        req.granted = true;
                        newly_granted.push(req.txn);
                    }
                }
                LockMode::Exclusive => {
                    if pos == 0 && !req.granted {
                        req.granted = true;
                        newly_granted.push(req.txn);
                    }
                    break;
                }
            }
        }
        newly_granted
    }

    fn apply_grants(&mut self, newly_granted: Vec<u64>) -> Vec<u64> {
        let mut ready = Vec::new();
        for txn in newly_granted {
            if let Some(waits) = self.remaining_waits.get_mut(&txn) {
                *waits -= 1;
                if *waits == 0 {
                    self.remaining_waits.remove(&txn);
                    ready.push(txn);
                }
            }
        }
        ready
    }

    fn enqueue(&mut self, txn: u64, key: Key, mode: LockMode) -> bool {
        let queue = &mut self.queues[key as usize];
        queue.push_back(Request {
            txn,
            mode,
            granted: false,
        });
        let newly_granted = Self::regrant(queue);
        let granted_here = newly_granted.contains(&txn);
        if !granted_here {
            *self.remaining_waits.entry(txn).or_insert(0) += 1;
        }
        granted_here
    }

    /// Request an exclusive lock on `key`. Returns whether it was granted
    /// immediately.
    pub fn write_lock(&mut self, txn: u64, key: Key) -> bool {
        self.enqueue(txn, key, LockMode::Exclusive)
    }

    /// Request a shared lock on `key`. Returns whether it was granted
    /// immediately.
    pub fn read_lock(&mut self, txn: u64, key: Key) -> bool {
        self.enqueue(txn, key, LockMode::Shared)
    }

    /// Release `txn`'s request on `key`, wherever in the queue it sits, and
    /// return every transaction newly granted as a result (their
    /// `remaining_waits` having reached zero).
    pub fn release(&mut self, txn: u64, key: Key) -> Vec<u64> {
        let queue = &mut self.queues[key as usize];
        if let Some(pos) = queue.iter().position(|r| r.txn == txn) {
            queue.remove(pos);
        }
        let newly_granted = Self::regrant(queue);
        self.apply_grants(newly_granted)
    }

    /// Withdraw a request that was enqueued but never granted.
    pub fn cancel_wait(&mut self, txn: u64, key: Key) {
        let queue = &mut self.queues[key as usize];
        if let Some(pos) = queue.iter().position(|r| r.txn == txn) {
            queue.remove(pos);
        }
        self.remaining_waits.remove(&txn);
    }

    /// Transactions currently holding a granted lock on `key`, head first.
    pub fn holders(&self, key: Key) -> Vec<u64> {
        self.queues[key as usize]
            .iter()
            .take_while(|r| r.granted)
            .map(|r| r.txn)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_a_second_writer_blocks_until_release() {
        let mut lm = LockManagerA::new(4);
        assert!(lm.write_lock(1, 0));
        assert!(!lm.write_lock(2, 0));
        assert_eq!(lm.release(1, 0), Some(2));
    }

    #[test]
    fn mode_a_multi_key_waiter_only_ready_once_all_granted() {
        let mut lm = LockManagerA::new(4);
        assert!(lm.write_lock(1, 0));
        assert!(lm.write_lock(1, 1));
        assert!(!lm.write_lock(2, 0));
        assert!(!lm.write_lock(2, 1));
        assert_eq!(lm.release(1, 0), None);
        assert_eq!(lm.release(1, 1), Some(2));
    }

    #[test]
    fn mode_b_shared_readers_coexist() {
        let mut lm = LockManagerB::new(4);
        assert!(lm.read_lock(1, 0));
        assert!(lm.read_lock(2, 0));
        assert_eq!(lm.holders(0), vec![1, 2]);
    }

    #[test]
    fn mode_b_writer_waits_behind_readers_then_grants_alone() {
        let mut lm = LockManagerB::new(4);
        assert!(lm.read_lock(1, 0));
        assert!(lm.read_lock(2, 0));
        assert!(!lm.write_lock(3, 0));
        assert_eq!(lm.release(1, 0), Vec::<u64>::new());
        assert_eq!(lm.release(2, 0), vec![3]);
        assert_eq!(lm.holders(0), vec![3]);
    }

    #[test]
    fn mode_b_reader_arriving_behind_waiting_writer_blocks_too() {
        let mut lm = LockManagerB::new(4);
        assert!(lm.write_lock(1, 0));
        assert!(!lm.write_lock(2, 0));
        assert!(!lm.read_lock(3, 0));
        assert_eq!(lm.release(1, 0), vec![2]);
        assert_eq!(lm.holders(0), vec![2]);
    }

    #[test]
    fn cancel_wait_withdraws_unsatisfied_request() {
        let mut lm = LockManagerA::new(2);
        assert!(lm.write_lock(1, 0));
        assert!(!lm.write_lock(2, 0));
        lm.cancel_wait(2, 0);
        assert_eq!(lm.release(1, 0), None);
    }
}
