//! The transaction descriptor and its execution contract

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::programs::TxnProgram;

/// Keys are dense 64-bit unsigned integers; the keyspace is bounded and
/// allocated up front by whichever storage backend is in use.
pub type Key = u64;

/// Values are 64-bit signed integers. Unsigned was considered (the protocol
/// only ever increments via `Rmw`, never goes negative in the reference
/// scenarios) but signed is the conventional default for an arithmetic value
/// type and avoids wrap-around surprises if a transaction program ever
/// subtracts.
pub type Value = i64;

/// Lifecycle of a transaction as it moves through a scheduler.
///
/// `CompletedC`/`CompletedA` are intermediate: they record what the
/// transaction's own program decided (commit or abort) before the scheduler
/// has finished validating/applying it. `Committed`/`Aborted` are terminal
/// and are the only statuses a caller ever observes via
/// [`crate::Transaction::status`] after `get_txn_result` returns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    /// Submitted, not yet run to completion.
    Incomplete,
    /// The transaction program ran and called `commit()`.
    CompletedC,
    /// The transaction program ran and called `abort()`.
    CompletedA,
    /// The scheduler validated/applied the transaction and it is durable in
    /// the sense this engine supports (visible to subsequent transactions).
    Committed,
    /// The scheduler validated the transaction and discarded its writes,
    /// either because the program itself aborted or because a conflict
    /// forced a restart that the caller chose not to observe.
    Aborted,
}

/// The live view a [`TxnProgram`] operates against while it runs.
///
/// `read` and `write` never touch storage directly; they go through
/// closures supplied by the scheduler, so the same program runs unmodified
/// whether the surrounding protocol is 2PL, OCC, MVCC-TO, or Strife.
pub struct TxnContext<'a> {
    reads: &'a mut BTreeMap<Key, Value>,
    writes: &'a mut BTreeMap<Key, Value>,
    status: &'a mut TxnStatus,
    reader: &'a mut dyn FnMut(Key) -> Option<Value>,
}

impl<'a> TxnContext<'a> {
    /// Read a key's current value through the scheduler-supplied accessor.
    ///
    /// The read is recorded in the transaction's `reads` buffer regardless
    /// of whether the key existed, matching the reference behavior where a
    /// miss is treated as value `0` by `Rmw`-style programs.
    pub fn read(&mut self, key: Key) -> Option<Value> {
        let value = (self.reader)(key);
        if let Some(v) = value {
            self.reads.insert(key, v);
        }
        value
    }

    /// Buffer a write. The scheduler applies buffered writes only once the
    /// transaction has been validated/admitted to commit.
    pub fn write(&mut self, key: Key, value: Value) {
        self.writes.insert(key, value);
    }

    /// Signal that the program's logic completed successfully.
    pub fn commit(&mut self) {
        *self.status = TxnStatus::CompletedC;
    }

    /// Signal that the program's logic decided to abort (e.g. an `Expect`
    /// precondition failed).
    pub fn abort(&mut self) {
        *self.status = TxnStatus::CompletedA;
    }
}

/// A transaction descriptor: identity, declared read/write sets, buffered
/// reads/writes, lifecycle status, and (for OCC-family protocols) the
/// timestamp its validation phase compares against.
pub struct Transaction {
    unique_id: u64,
    readset: BTreeSet<Key>,
    writeset: BTreeSet<Key>,
    reads: BTreeMap<Key, Value>,
    writes: BTreeMap<Key, Value>,
    status: TxnStatus,
    occ_start_time: u64,
    // `TxnProgram: Send` is a supertrait bound on implementors, not on the
    // trait object itself — `dyn TxnProgram` alone would not be `Send`, and
    // this field needs to be for a `Transaction` to cross into a worker
    // thread, hence the explicit `+ Send`.
    program: Box<dyn TxnProgram + Send>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("unique_id", &self.unique_id)
            .field("readset", &self.readset)
            .field("writeset", &self.writeset)
            .field("status", &self.status)
            .field("occ_start_time", &self.occ_start_time)
            .finish()
    }
}

impl Transaction {
    /// Build a new transaction. `readset`/`writeset` declare which keys the
    /// program intends to touch; schedulers that need declared sets ahead of
    /// execution (2PL, Strife) rely on these being accurate.
    pub fn new(
        unique_id: u64,
        readset: BTreeSet<Key>,
        writeset: BTreeSet<Key>,
        program: impl TxnProgram + Send + 'static,
    ) -> Self {
        Self {
            unique_id,
            readset,
            writeset,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
            status: TxnStatus::Incomplete,
            occ_start_time: 0,
            program: Box::new(program),
        }
    }

    /// This transaction's globally unique, monotonically assigned id.
    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    /// Declared read set.
    pub fn readset(&self) -> &BTreeSet<Key> {
        &self.readset
    }

    /// Declared write set.
    pub fn writeset(&self) -> &BTreeSet<Key> {
        &self.writeset
    }

    /// Keys actually read during execution, with the values observed.
    pub fn reads(&self) -> &BTreeMap<Key, Value> {
        &self.reads
    }

    /// Keys buffered for write during execution, not yet applied to storage.
    pub fn writes(&self) -> &BTreeMap<Key, Value> {
        &self.writes
    }

    /// Current lifecycle status.
    pub fn status(&self) -> TxnStatus {
        self.status
    }

    /// Force a terminal status. Used by the scheduler once it has validated
    /// or aborted the transaction following execution.
    pub fn set_status(&mut self, status: TxnStatus) {
        self.status = status;
    }

    /// The timestamp OCC/P-OCC validation compares the active set's commit
    /// order against. Set by the scheduler at dispatch time.
    pub fn occ_start_time(&self) -> u64 {
        self.occ_start_time
    }

    /// Record the dispatch-time timestamp used by OCC validation.
    pub fn set_occ_start_time(&mut self, ts: u64) {
        self.occ_start_time = ts;
    }

    /// Reset this transaction for a restart after a concurrency-control
    /// conflict: a fresh id, cleared buffered reads/writes, status back to
    /// `Incomplete`. `readset`/`writeset`/`program` are untouched, so the
    /// restarted attempt re-runs the same logic against the same declared
    /// access sets. Never used for a user abort — that result is final.
    pub fn restart(&mut self, fresh_id: u64) {
        tracing::trace!(old_id = self.unique_id, new_id = fresh_id, "restarting transaction");
        self.unique_id = fresh_id;
        self.reads.clear();
        self.writes.clear();
        self.status = TxnStatus::Incomplete;
        self.occ_start_time = 0;
    }

    /// Run the transaction's program against a scheduler-supplied key
    /// reader, buffering any writes and reads into this descriptor.
    ///
    /// # Panics
    ///
    /// Does not panic itself, but a scheduler that observes
    /// `status() == Incomplete` after calling this indicates a program that
    /// never called `commit()`/`abort()`, which every scheduler treats as a
    /// fatal protocol violation.
    pub fn execute(&mut self, mut reader: impl FnMut(Key) -> Option<Value>) {
        let Transaction {
            reads,
            writes,
            status,
            program,
            ..
        } = self;
        let mut ctx = TxnContext {
            reads,
            writes,
            status,
            reader: &mut reader,
        };
        program.run(&mut ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programs::{Expect, Noop, Put, Rmw};
    use std::collections::BTreeMap;

    fn memory_reader(store: BTreeMap<Key, Value>) -> impl FnMut(Key) -> Option<Value> {
        move |k| store.get(&k).copied()
    }

    #[test]
    fn put_commits_and_buffers_writes() {
        let mut txn = Transaction::new(
            1,
            BTreeSet::new(),
            [10, 20].into_iter().collect(),
            Put([(10, 1), (20, 2)].into_iter().collect()),
        );
        txn.execute(memory_reader(BTreeMap::new()));
        assert_eq!(txn.status(), TxnStatus::CompletedC);
        assert_eq!(txn.writes().get(&10), Some(&1));
        assert_eq!(txn.writes().get(&20), Some(&2));
    }

    #[test]
    fn expect_aborts_on_mismatch() {
        let mut txn = Transaction::new(
            2,
            [10].into_iter().collect(),
            BTreeSet::new(),
            Expect([(10, 5)].into_iter().collect()),
        );
        txn.execute(memory_reader([(10, 9)].into_iter().collect()));
        assert_eq!(txn.status(), TxnStatus::CompletedA);
    }

    #[test]
    fn rmw_treats_missing_key_as_zero() {
        let mut txn = Transaction::new(
            3,
            BTreeSet::new(),
            [7].into_iter().collect(),
            Rmw {
                readset: BTreeSet::new(),
                writeset: [7].into_iter().collect(),
            },
        );
        txn.execute(memory_reader(BTreeMap::new()));
        assert_eq!(txn.status(), TxnStatus::CompletedC);
        assert_eq!(txn.writes().get(&7), Some(&1));
    }

    #[test]
    fn restart_clears_buffers_but_keeps_access_sets() {
        let mut txn = Transaction::new(
            5,
            BTreeSet::new(),
            [1].into_iter().collect(),
            Put([(1, 9)].into_iter().collect()),
        );
        txn.execute(memory_reader(BTreeMap::new()));
        assert_eq!(txn.status(), TxnStatus::CompletedC);
        txn.restart(6);
        assert_eq!(txn.unique_id(), 6);
        assert_eq!(txn.status(), TxnStatus::Incomplete);
        assert!(txn.writes().is_empty());
        assert_eq!(txn.writeset(), &[1].into_iter().collect());
    }

    #[test]
    fn set_status_overrides_completion() {
        let mut txn = Transaction::new(4, BTreeSet::new(), BTreeSet::new(), Noop);
        txn.execute(memory_reader(BTreeMap::new()));
        assert_eq!(txn.status(), TxnStatus::CompletedC);
        txn.set_status(TxnStatus::Committed);
        assert_eq!(txn.status(), TxnStatus::Committed);
    }

    proptest::proptest! {
        /// Rmw always reads-then-increments: starting from any prior value,
        /// one execution leaves the key at exactly one more than it read.
        #[test]
        fn rmw_increments_by_exactly_one(prior in 0i64..1_000_000) {
            let mut txn = Transaction::new(
                9,
                BTreeSet::new(),
                [1].into_iter().collect(),
                Rmw {
                    readset: BTreeSet::new(),
                    writeset: [1].into_iter().collect(),
                },
            );
            txn.execute(memory_reader([(1, prior)].into_iter().collect()));
            prop_assert_eq!(txn.status(), TxnStatus::CompletedC);
            prop_assert_eq!(txn.writes().get(&1).copied(), Some(prior + 1));
        }
    }
}
