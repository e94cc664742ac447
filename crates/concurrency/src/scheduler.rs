//! The seven protocol event loops, each running on its own dedicated,
//! CPU-pinned scheduler thread, dispatching execution work onto the shared
//! [`WorkerPool`].
//!
//! Every loop shares the same shape: pull a request, hand it (directly or
//! through the worker pool) to whatever makes it runnable, drain whatever
//! has finished, and decide commit/restart. What differs per protocol is
//! which storage backend it drives and where the commit/restart decision is
//! made — on the scheduler thread for Serial/2PL/OCC, on the worker thread
//! for P-OCC/MVCC-TO/Strife's conflict-free and residual phases.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use rand::Rng;
use rayon::prelude::*;
use tracing::error;

use ccstore_core::{CcMode, Error, Key, Result, Transaction, TxnStatus};
use ccstore_storage::{ClusteredStore, MvccStore, StorageBackend};

use crate::active_set::{ActiveEntry, ActiveSet};
use crate::lock_manager::{LockManagerA, LockManagerB};
use crate::union_find;
use crate::worker_pool::WorkerPool;

/// Error type surfaced by scheduler construction; an alias for the shared
/// core error enum rather than a crate-local type, since the failure modes
/// (invalid config, worker spawn failure) are already fully described there.
pub type SchedulerError = Error;

const SPIN_SLEEP: Duration = Duration::from_micros(200);

/// Tuning knobs for one scheduler instance, independent of protocol.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Size of the CPU-pinned worker pool.
    pub workers: usize,
    /// Number of keys the storage backend is sized for.
    pub keyspace_size: u64,
    /// Strife spot-sampling breadth.
    pub strife_k: usize,
    /// Strife merge threshold, in `(0.0, 1.0]`.
    pub strife_alpha: f64,
    /// Strife batch-collection window.
    pub strife_batch_window: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 7,
            keyspace_size: 1_000_000,
            strife_k: 23,
            strife_alpha: 0.2,
            strife_batch_window: Duration::from_millis(10),
        }
    }
}

impl SchedulerConfig {
    /// Reject configurations that would silently misbehave rather than
    /// clamp them: a `strife_alpha` of `1.5` or zero workers is a caller
    /// mistake, not a valid request to be rounded into range.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be at least 1".into()));
        }
        if self.keyspace_size == 0 {
            return Err(Error::InvalidConfig("keyspace_size must be at least 1".into()));
        }
        if self.strife_k == 0 {
            return Err(Error::InvalidConfig("strife_k must be at least 1".into()));
        }
        if !(self.strife_alpha > 0.0 && self.strife_alpha <= 1.0) {
            return Err(Error::InvalidConfig(
                "strife_alpha must be in (0.0, 1.0]".into(),
            ));
        }
        Ok(())
    }
}

enum WorkerOutcome {
    Done(Transaction),
    Restart(Transaction),
}

/// Cross-pair fuse counters for Strife's special-cluster slots, flattened
/// into a `k * k` atomic matrix so the parallel fuse phase can update it
/// without a lock.
struct PairCounts {
    k: usize,
    counts: Vec<AtomicU64>,
}

impl PairCounts {
    fn new(k: usize) -> Self {
        Self {
            k,
            counts: (0..k * k).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn increment(&self, i: usize, j: usize) {
        self.counts[i * self.k + j].fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self, i: usize, j: usize) -> u64 {
        self.counts[i * self.k + j].load(Ordering::Relaxed)
    }
}

/// A transaction's declared access sets, extracted up front so Strife's
/// parallel phases can fan out over `&[BatchEntry]` without requiring
/// `Transaction` itself to be `Sync` (it isn't: its boxed program isn't).
struct BatchEntry {
    readset: BTreeSet<Key>,
    writeset: BTreeSet<Key>,
}

/// A live scheduler: the request/result channels plus the background
/// thread driving them. Dropping it stops the scheduler thread and joins
/// it.
pub struct SchedulerHandle {
    /// Submit a transaction for admission.
    pub requests: Sender<Transaction>,
    /// Receive completed (committed or aborted) transactions.
    pub results: crossbeam_channel::Receiver<Transaction>,
    next_id: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl SchedulerHandle {
    /// Draw a fresh unique id from the same monotonic sequence the
    /// scheduler thread uses internally for restarts, so a caller stamping
    /// a transaction ahead of [`Self::requests`] can never collide with one
    /// a protocol assigns on retry.
    pub fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Build the storage backend, worker pool, and scheduler thread for `mode`,
/// and return a handle to talk to it.
pub fn spawn(mode: CcMode, config: SchedulerConfig) -> Result<SchedulerHandle> {
    config.validate()?;

    let storage = Arc::new(match mode {
        CcMode::Serial | CcMode::LockingExclusiveOnly | CcMode::Locking | CcMode::Occ | CcMode::POcc => {
            StorageBackend::single(config.keyspace_size)
        }
        CcMode::Mvcc => StorageBackend::mvcc(config.keyspace_size),
        CcMode::Strife => StorageBackend::clustered(config.keyspace_size, config.strife_k),
    });

    let workers = WorkerPool::new(config.workers)?;
    let (request_tx, request_rx) = crossbeam_channel::unbounded::<Transaction>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<Transaction>();
    let shutdown = Arc::new(AtomicBool::new(false));
    let next_id = Arc::new(AtomicU64::new(0));

    let mut scheduler = Scheduler {
        mode,
        config: config.clone(),
        storage,
        workers,
        txn_requests: request_rx,
        txn_results: result_tx,
        next_id: next_id.clone(),
        active_set: Arc::new(ActiveSet::new()),
        shutdown: shutdown.clone(),
    };

    let pin = core_affinity::get_core_ids()
        .unwrap_or_default()
        .into_iter()
        .nth(config.workers);

    let thread = thread::Builder::new()
        .name("ccstore-scheduler".to_string())
        .spawn(move || {
            if let Some(core) = pin {
                core_affinity::set_for_current(core);
            }
            scheduler.run();
        })
        .map_err(|e| Error::WorkerSpawnFailed {
            index: config.workers,
            reason: e.to_string(),
        })?;

    Ok(SchedulerHandle {
        requests: request_tx,
        results: result_rx,
        next_id,
        thread: Some(thread),
        shutdown,
    })
}

struct Scheduler {
    mode: CcMode,
    config: SchedulerConfig,
    storage: Arc<StorageBackend>,
    workers: WorkerPool,
    txn_requests: crossbeam_channel::Receiver<Transaction>,
    txn_results: Sender<Transaction>,
    next_id: Arc<AtomicU64>,
    active_set: Arc<ActiveSet>,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn fatal_invalid_status(&self, txn_id: u64, status: TxnStatus) -> ! {
        let err = Error::InvalidFinalStatus { txn_id, status };
        error!(txn_id, ?status, "{err}");
        panic!("{err}");
    }

    fn run(&mut self) {
        match self.mode {
            CcMode::Serial => self.run_serial(),
            CcMode::LockingExclusiveOnly => self.run_locking(false),
            CcMode::Locking => self.run_locking(true),
            CcMode::Occ => self.run_occ(),
            CcMode::POcc => self.run_p_occ(),
            CcMode::Mvcc => self.run_mvcc(),
            CcMode::Strife => self.run_strife(),
        }
    }

    // ---- Serial -----------------------------------------------------

    fn run_serial(&mut self) {
        let single = self
            .storage
            .as_single()
            .expect("serial scheduler requires single-version storage");
        loop {
            match self.txn_requests.recv_timeout(SPIN_SLEEP) {
                Ok(mut txn) => {
                    txn.execute(|key| Some(single.read(key)));
                    match txn.status() {
                        TxnStatus::CompletedC => {
                            for (&k, &v) in txn.writes() {
                                single.write(k, v);
                            }
                            txn.set_status(TxnStatus::Committed);
                        }
                        TxnStatus::CompletedA => txn.set_status(TxnStatus::Aborted),
                        other => self.fatal_invalid_status(txn.unique_id(), other),
                    }
                    let _ = self.txn_results.send(txn);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    // ---- 2PL-X / 2PL-SX ----------------------------------------------

    fn run_locking(&mut self, mode_b: bool) {
        let mut lock_a = (!mode_b).then(|| LockManagerA::new(self.config.keyspace_size));
        let mut lock_b = mode_b.then(|| LockManagerB::new(self.config.keyspace_size));
        let mut waiting: HashMap<u64, Transaction> = HashMap::new();
        let mut pending: VecDeque<Transaction> = VecDeque::new();
        let (completed_tx, completed_rx) = crossbeam_channel::unbounded::<Transaction>();

        loop {
            let mut made_progress = false;

            if let Some(txn) = pending.pop_front().or_else(|| self.txn_requests.try_recv().ok()) {
                made_progress = true;
                self.admit_locking(
                    txn,
                    mode_b,
                    &mut lock_a,
                    &mut lock_b,
                    &mut waiting,
                    &mut pending,
                    &completed_tx,
                );
            }

            while let Ok(txn) = completed_rx.try_recv() {
                made_progress = true;
                self.finish_locking(txn, mode_b, &mut lock_a, &mut lock_b, &mut waiting, &completed_tx);
            }

            if !made_progress {
                if self.shutdown.load(Ordering::Relaxed) && pending.is_empty() && waiting.is_empty() {
                    break;
                }
                thread::sleep(SPIN_SLEEP);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn admit_locking(
        &self,
        mut txn: Transaction,
        mode_b: bool,
        lock_a: &mut Option<LockManagerA>,
        lock_b: &mut Option<LockManagerB>,
        waiting: &mut HashMap<u64, Transaction>,
        pending: &mut VecDeque<Transaction>,
        completed_tx: &Sender<Transaction>,
    ) {
        let keys: Vec<Key> = txn.readset().iter().chain(txn.writeset().iter()).copied().collect();
        let read_count = txn.readset().len();
        let mut acquired: Vec<Key> = Vec::with_capacity(keys.len());
        let mut denied = false;

        for (i, &key) in keys.iter().enumerate() {
            let is_read = i < read_count;
            let granted = if mode_b {
                let lm = lock_b.as_mut().unwrap();
                if is_read {
                    lm.read_lock(txn.unique_id(), key)
                } else {
                    lm.write_lock(txn.unique_id(), key)
                }
            } else {
                let lm = lock_a.as_mut().unwrap();
                if is_read {
                    lm.read_lock(txn.unique_id(), key)
                } else {
                    lm.write_lock(txn.unique_id(), key)
                }
            };
            if granted {
                acquired.push(key);
            } else {
                denied = true;
                break;
            }
        }

        if !denied {
            self.dispatch_locking(txn, completed_tx.clone());
            return;
        }

        if keys.len() > 1 {
            for key in acquired {
                let woken: Vec<u64> = if mode_b {
                    lock_b.as_mut().unwrap().release(txn.unique_id(), key)
                } else {
                    lock_a
                        .as_mut()
                        .unwrap()
                        .release(txn.unique_id(), key)
                        .into_iter()
                        .collect()
                };
                for id in woken {
                    if let Some(ready) = waiting.remove(&id) {
                        self.dispatch_locking(ready, completed_tx.clone());
                    }
                }
            }
            let denied_key = keys[acquired.len()];
            if mode_b {
                lock_b.as_mut().unwrap().cancel_wait(txn.unique_id(), denied_key);
            } else {
                lock_a.as_mut().unwrap().cancel_wait(txn.unique_id(), denied_key);
            }
            txn.restart(self.alloc_id());
            pending.push_back(txn);
        } else {
            // Degenerate |R|+|W| = 1 case: the single request stays queued
            // in the lock manager (it already incremented its own
            // `remaining_waits`) and wakes up through `release`, not restart.
            waiting.insert(txn.unique_id(), txn);
        }
    }

    fn dispatch_locking(&self, mut txn: Transaction, completed_tx: Sender<Transaction>) {
        let storage = self.storage.clone();
        self.workers.submit(move || {
            let single = storage
                .as_single()
                .expect("locking schedulers require single-version storage");
            txn.execute(|key| Some(single.read(key)));
            let _ = completed_tx.send(txn);
        });
    }

    fn finish_locking(
        &self,
        mut txn: Transaction,
        mode_b: bool,
        lock_a: &mut Option<LockManagerA>,
        lock_b: &mut Option<LockManagerB>,
        waiting: &mut HashMap<u64, Transaction>,
        completed_tx: &Sender<Transaction>,
    ) {
        let single = self
            .storage
            .as_single()
            .expect("locking schedulers require single-version storage");
        match txn.status() {
            TxnStatus::CompletedC => {
                for (&k, &v) in txn.writes() {
                    single.write(k, v);
                }
                txn.set_status(TxnStatus::Committed);
            }
            TxnStatus::CompletedA => txn.set_status(TxnStatus::Aborted),
            other => self.fatal_invalid_status(txn.unique_id(), other),
        }

        let mut woken = Vec::new();
        for &key in txn.readset().iter().chain(txn.writeset().iter()) {
            if mode_b {
                woken.extend(lock_b.as_mut().unwrap().release(txn.unique_id(), key));
            } else if let Some(id) = lock_a.as_mut().unwrap().release(txn.unique_id(), key) {
                woken.push(id);
            }
        }

        let _ = self.txn_results.send(txn);

        for id in woken {
            if let Some(ready) = waiting.remove(&id) {
                self.dispatch_locking(ready, completed_tx.clone());
            }
        }
    }

    // ---- OCC -----------------------------------------------------------

    fn run_occ(&mut self) {
        let mut retry: VecDeque<Transaction> = VecDeque::new();
        let (completed_tx, completed_rx) = crossbeam_channel::unbounded::<Transaction>();

        loop {
            let mut made_progress = false;

            if let Some(mut txn) = retry.pop_front().or_else(|| self.txn_requests.try_recv().ok()) {
                made_progress = true;
                let single = self
                    .storage
                    .as_single()
                    .expect("OCC requires single-version storage");
                txn.set_occ_start_time(single.tick());
                self.dispatch_occ(txn, completed_tx.clone());
            }

            while let Ok(txn) = completed_rx.try_recv() {
                made_progress = true;
                self.finish_occ(txn, &mut retry);
            }

            if !made_progress {
                if self.shutdown.load(Ordering::Relaxed) && retry.is_empty() {
                    break;
                }
                thread::sleep(SPIN_SLEEP);
            }
        }
    }

    fn dispatch_occ(&self, mut txn: Transaction, completed_tx: Sender<Transaction>) {
        let storage = self.storage.clone();
        self.workers.submit(move || {
            let single = storage.as_single().expect("OCC requires single-version storage");
            txn.execute(|key| Some(single.read(key)));
            let _ = completed_tx.send(txn);
        });
    }

    fn finish_occ(&self, mut txn: Transaction, retry: &mut VecDeque<Transaction>) {
        let single = self
            .storage
            .as_single()
            .expect("OCC requires single-version storage");
        let valid = txn
            .readset()
            .iter()
            .chain(txn.writeset().iter())
            .all(|&k| single.timestamp(k) <= txn.occ_start_time());

        if valid {
            match txn.status() {
                TxnStatus::CompletedC => {
                    for (&k, &v) in txn.writes() {
                        single.write(k, v);
                    }
                    txn.set_status(TxnStatus::Committed);
                }
                TxnStatus::CompletedA => txn.set_status(TxnStatus::Aborted),
                other => self.fatal_invalid_status(txn.unique_id(), other),
            }
            let _ = self.txn_results.send(txn);
        } else {
            txn.restart(self.alloc_id());
            retry.push_back(txn);
        }
    }

    // ---- P-OCC ----------------------------------------------------------

    fn run_p_occ(&mut self) {
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded::<WorkerOutcome>();
        let mut outstanding = 0usize;

        loop {
            let mut made_progress = false;

            if let Ok(txn) = self.txn_requests.try_recv() {
                made_progress = true;
                outstanding += 1;
                self.dispatch_p_occ(txn, outcome_tx.clone());
            }

            while let Ok(outcome) = outcome_rx.try_recv() {
                made_progress = true;
                outstanding -= 1;
                match outcome {
                    WorkerOutcome::Done(txn) => {
                        let _ = self.txn_results.send(txn);
                    }
                    WorkerOutcome::Restart(mut txn) => {
                        txn.restart(self.alloc_id());
                        outstanding += 1;
                        self.dispatch_p_occ(txn, outcome_tx.clone());
                    }
                }
            }

            if !made_progress {
                if self.shutdown.load(Ordering::Relaxed) && outstanding == 0 {
                    break;
                }
                thread::sleep(SPIN_SLEEP);
            }
        }
    }

    fn dispatch_p_occ(&self, mut txn: Transaction, outcome_tx: Sender<WorkerOutcome>) {
        let storage = self.storage.clone();
        let active_set = self.active_set.clone();
        self.workers.submit(move || {
            let single = storage
                .as_single()
                .expect("P-OCC requires single-version storage");
            let txn_id = txn.unique_id();
            txn.set_occ_start_time(single.tick());
            txn.execute(|key| Some(single.read(key)));

            // The snapshot-then-insert below is the one atomic critical
            // section every validator passes through; any two concurrent
            // validators are therefore guaranteed to see each other in at
            // least one direction.
            let entry = ActiveEntry {
                txn_id,
                readset: txn.readset().clone(),
                writeset: txn.writeset().clone(),
            };
            let snapshot = active_set.snapshot_and_insert(entry);

            let ts_ok = txn
                .readset()
                .iter()
                .chain(txn.writeset().iter())
                .all(|&k| single.timestamp(k) <= txn.occ_start_time());
            let disjoint_ok = snapshot.iter().all(|other| {
                txn.writeset().is_disjoint(&other.writeset) && txn.readset().is_disjoint(&other.writeset)
            });

            let outcome = if ts_ok && disjoint_ok {
                match txn.status() {
                    TxnStatus::CompletedC => {
                        for (&k, &v) in txn.writes() {
                            single.write(k, v);
                        }
                        txn.set_status(TxnStatus::Committed);
                    }
                    TxnStatus::CompletedA => txn.set_status(TxnStatus::Aborted),
                    other => {
                        let err = Error::InvalidFinalStatus { txn_id, status: other };
                        error!("{err}");
                        panic!("{err}");
                    }
                }
                active_set.remove(txn_id);
                WorkerOutcome::Done(txn)
            } else {
                active_set.remove(txn_id);
                WorkerOutcome::Restart(txn)
            };
            let _ = outcome_tx.send(outcome);
        });
    }

    // ---- MVCC-TO --------------------------------------------------------

    fn run_mvcc(&mut self) {
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded::<WorkerOutcome>();
        let mut outstanding = 0usize;

        loop {
            let mut made_progress = false;

            if let Ok(txn) = self.txn_requests.try_recv() {
                made_progress = true;
                outstanding += 1;
                self.dispatch_mvcc(txn, outcome_tx.clone());
            }

            while let Ok(outcome) = outcome_rx.try_recv() {
                made_progress = true;
                outstanding -= 1;
                match outcome {
                    WorkerOutcome::Done(txn) => {
                        let _ = self.txn_results.send(txn);
                    }
                    WorkerOutcome::Restart(mut txn) => {
                        txn.restart(self.alloc_id());
                        outstanding += 1;
                        self.dispatch_mvcc(txn, outcome_tx.clone());
                    }
                }
            }

            if !made_progress {
                if self.shutdown.load(Ordering::Relaxed) && outstanding == 0 {
                    break;
                }
                thread::sleep(SPIN_SLEEP);
            }
        }
    }

    fn dispatch_mvcc(&self, mut txn: Transaction, outcome_tx: Sender<WorkerOutcome>) {
        let storage = self.storage.clone();
        self.workers.submit(move || {
            let mvcc = storage.as_mvcc().expect("MVCC-TO requires MVCC storage");
            let txn_id = txn.unique_id();

            // Touch every writeset key even if the program never reads it
            // back (e.g. a blind `Put`), so `check_write` below sees this
            // transaction's id in `max_read_id` for the version it's about
            // to shadow. Readset keys need no separate touch: the program
            // reaches them through `ctx.read` inside `execute`, which goes
            // through the same `mvcc.read` call.
            for &key in txn.writeset().iter() {
                mvcc.read(key, txn_id);
            }
            txn.execute(|key| Some(mvcc.read(key, txn_id)));

            let write_keys: Vec<Key> = txn.writeset().iter().copied().collect();
            let mut guards: Vec<_> = write_keys.iter().map(|&k| mvcc.lock_for_write(k)).collect();
            let ok = guards.iter().all(|chain| MvccStore::check_write(chain, txn_id));

            if ok {
                match txn.status() {
                    TxnStatus::CompletedC => {
                        for (key, chain) in write_keys.iter().zip(guards.iter_mut()) {
                            if let Some(&value) = txn.writes().get(key) {
                                MvccStore::install(chain, txn_id, value);
                            }
                        }
                        txn.set_status(TxnStatus::Committed);
                    }
                    TxnStatus::CompletedA => txn.set_status(TxnStatus::Aborted),
                    other => {
                        let err = Error::InvalidFinalStatus { txn_id, status: other };
                        error!("{err}");
                        panic!("{err}");
                    }
                }
            }
            drop(guards);

            let outcome = if ok { WorkerOutcome::Done(txn) } else { WorkerOutcome::Restart(txn) };
            let _ = outcome_tx.send(outcome);
        });
    }

    // ---- Strife -----------------------------------------------------------

    fn run_strife(&mut self) {
        let keyspace_size = self.config.keyspace_size;
        let k = self.config.strife_k;
        let alpha = self.config.strife_alpha;
        let window = self.config.strife_batch_window;
        let mut rng = rand::thread_rng();

        loop {
            let batch = self.collect_batch(window);
            if batch.is_empty() {
                if self.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                thread::sleep(SPIN_SLEEP);
                continue;
            }
            self.run_strife_batch(batch, k, alpha, &mut rng, keyspace_size);
        }
    }

    fn collect_batch(&self, window: Duration) -> Vec<Transaction> {
        let mut batch = Vec::new();
        let deadline = Instant::now() + window;
        while let Ok(txn) = self.txn_requests.recv_deadline(deadline) {
            batch.push(txn);
        }
        batch
    }

    fn run_strife_batch(
        &self,
        batch: Vec<Transaction>,
        k: usize,
        alpha: f64,
        rng: &mut impl Rng,
        keyspace_size: u64,
    ) {
        let store = self
            .storage
            .as_clustered()
            .expect("Strife requires clustered storage");

        // 1. Prepare, parallelized across cluster indices.
        (0..store.index_count()).into_par_iter().for_each(|i| store.reset_cluster(i));

        let entries: Vec<BatchEntry> = batch
            .iter()
            .map(|t| BatchEntry {
                readset: t.readset().clone(),
                writeset: t.writeset().clone(),
            })
            .collect();

        // 2. Spot: sample up to k transactions, promote any whose writeset
        // is entirely plain (not yet special) into a fresh special slot.
        let mut promoted_slots: Vec<usize> = Vec::new();
        let sample_size = k.min(entries.len());
        let sample = rand::seq::index::sample(rng, entries.len(), sample_size);
        for i in sample.iter() {
            if promoted_slots.len() >= store.special_slots() {
                break;
            }
            let (special, plain) = Self::partition_writeset(store, &entries[i]);
            if special.is_empty() && !plain.is_empty() {
                let slot = promoted_slots.len();
                let slot_index = store.special_index(slot);
                for &c in &plain {
                    union_find::union(store, c, slot_index);
                }
                store.cluster(slot_index).with_state_mut(|s| {
                    s.special_id = Some(slot);
                    s.count += 1;
                });
                promoted_slots.push(slot);
            }
        }

        // 3. Fuse, parallelized over transactions.
        let pair_counts = PairCounts::new(store.special_slots());
        entries.par_iter().for_each(|entry| {
            let (special, plain) = Self::partition_writeset(store, entry);
            if special.len() <= 1 {
                let Some(&c) = special.iter().next().or_else(|| plain.iter().next()) else {
                    return;
                };
                for &other in &plain {
                    if other != c {
                        union_find::union(store, c, other);
                    }
                }
                let root = union_find::find(store, c);
                store.cluster(root).with_state_mut(|s| s.count += 1);
            } else {
                let ids: Vec<usize> = special
                    .iter()
                    .filter_map(|&root| store.cluster(root).state().special_id)
                    .collect();
                for &i in &ids {
                    for &j in &ids {
                        if i != j {
                            pair_counts.increment(i, j);
                        }
                    }
                }
            }
        });

        // 4. Merge, single-threaded.
        for i in 0..promoted_slots.len() {
            for j in (i + 1)..promoted_slots.len() {
                let slot_a = promoted_slots[i];
                let slot_b = promoted_slots[j];
                let root_a = union_find::find(store, store.special_index(slot_a));
                let root_b = union_find::find(store, store.special_index(slot_b));
                if root_a == root_b {
                    continue;
                }
                let n1 = pair_counts.get(slot_a, slot_b) + pair_counts.get(slot_b, slot_a);
                let count_a = store.cluster(root_a).state().count;
                let count_b = store.cluster(root_b).state().count;
                let n2 = count_a + count_b + n1;
                if n2 > 0 && (n1 as f64) >= alpha * (n2 as f64) {
                    union_find::union(store, root_a, root_b);
                }
            }
        }

        // 5. Allocate, parallelized over transactions; transactions whose
        // access set spans more than one cluster fall to the residual queue.
        let assignment: Vec<Option<usize>> = entries
            .par_iter()
            .map(|entry| {
                let mut roots = BTreeSet::new();
                for &key in entry.readset.iter().chain(entry.writeset.iter()) {
                    roots.insert(union_find::find_compress(store, store.index_of(key)));
                }
                if roots.len() == 1 {
                    roots.into_iter().next()
                } else {
                    None
                }
            })
            .collect();

        let mut by_cluster: HashMap<usize, Vec<Transaction>> = HashMap::new();
        let mut residuals: Vec<Transaction> = Vec::new();
        for (i, txn) in batch.into_iter().enumerate() {
            match assignment[i] {
                Some(root) => by_cluster.entry(root).or_default().push(txn),
                None => residuals.push(txn),
            }
        }

        // 6. Conflict-free execution: one worker per cluster, running that
        // cluster's transactions sequentially; a barrier before residuals,
        // since they may depend on writes the conflict-free phase just made.
        if !by_cluster.is_empty() {
            let cluster_count = by_cluster.len();
            let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(cluster_count);
            for (_, txns) in by_cluster {
                let storage = self.storage.clone();
                let txn_results = self.txn_results.clone();
                let done_tx = done_tx.clone();
                self.workers.submit(move || {
                    let store = storage
                        .as_clustered()
                        .expect("Strife requires clustered storage");
                    for mut txn in txns {
                        txn.execute(|key| Some(store.read(key)));
                        match txn.status() {
                            TxnStatus::CompletedC => {
                                for (&k, &v) in txn.writes() {
                                    store.write(k, v);
                                }
                                txn.set_status(TxnStatus::Committed);
                            }
                            TxnStatus::CompletedA => txn.set_status(TxnStatus::Aborted),
                            other => {
                                let txn_id = txn.unique_id();
                                let err = Error::InvalidFinalStatus { txn_id, status: other };
                                error!("{err}");
                                panic!("{err}");
                            }
                        }
                        let _ = txn_results.send(txn);
                    }
                    let _ = done_tx.send(());
                });
            }
            for _ in 0..cluster_count {
                let _ = done_rx.recv();
            }
        }

        // 7. Residuals, single-threaded, under 2PL-SX admission.
        if !residuals.is_empty() {
            self.run_residuals(store, residuals, keyspace_size);
        }
    }

    fn partition_writeset(store: &ClusteredStore, entry: &BatchEntry) -> (BTreeSet<usize>, BTreeSet<usize>) {
        let mut special = BTreeSet::new();
        let mut plain = BTreeSet::new();
        for &key in &entry.writeset {
            let root = union_find::find_compress(store, store.index_of(key));
            if store.cluster(root).state().address > store.max_address() {
                special.insert(root);
            } else {
                plain.insert(root);
            }
        }
        (special, plain)
    }

    fn run_residuals(&self, store: &ClusteredStore, residuals: Vec<Transaction>, keyspace_size: u64) {
        let mut lock_manager = LockManagerB::new(keyspace_size);
        let mut waiting: HashMap<u64, Transaction> = HashMap::new();
        let mut pending: VecDeque<Transaction> = residuals.into();

        while let Some(txn) = pending.pop_front() {
            self.admit_residual(txn, store, &mut lock_manager, &mut waiting, &mut pending);
        }
        debug_assert!(waiting.is_empty(), "every residual must resolve within its own batch");
    }

    fn admit_residual(
        &self,
        mut txn: Transaction,
        store: &ClusteredStore,
        lock_manager: &mut LockManagerB,
        waiting: &mut HashMap<u64, Transaction>,
        pending: &mut VecDeque<Transaction>,
    ) {
        let keys: Vec<Key> = txn.readset().iter().chain(txn.writeset().iter()).copied().collect();
        let read_count = txn.readset().len();
        let mut acquired: Vec<Key> = Vec::with_capacity(keys.len());
        let mut denied = false;

        for (i, &key) in keys.iter().enumerate() {
            let granted = if i < read_count {
                lock_manager.read_lock(txn.unique_id(), key)
            } else {
                lock_manager.write_lock(txn.unique_id(), key)
            };
            if granted {
                acquired.push(key);
            } else {
                denied = true;
                break;
            }
        }

        if !denied {
            self.run_residual_inline(txn, store, lock_manager, waiting);
            return;
        }

        if keys.len() > 1 {
            for key in acquired {
                for id in lock_manager.release(txn.unique_id(), key) {
                    if let Some(ready) = waiting.remove(&id) {
                        self.run_residual_inline(ready, store, lock_manager, waiting);
                    }
                }
            }
            lock_manager.cancel_wait(txn.unique_id(), keys[acquired.len()]);
            txn.restart(self.alloc_id());
            pending.push_back(txn);
        } else {
            waiting.insert(txn.unique_id(), txn);
        }
    }

    fn run_residual_inline(
        &self,
        mut txn: Transaction,
        store: &ClusteredStore,
        lock_manager: &mut LockManagerB,
        waiting: &mut HashMap<u64, Transaction>,
    ) {
        txn.execute(|key| Some(store.read(key)));
        match txn.status() {
            TxnStatus::CompletedC => {
                for (&k, &v) in txn.writes() {
                    store.write(k, v);
                }
                txn.set_status(TxnStatus::Committed);
            }
            TxnStatus::CompletedA => txn.set_status(TxnStatus::Aborted),
            other => self.fatal_invalid_status(txn.unique_id(), other),
        }

        let mut woken = Vec::new();
        for &key in txn.readset().iter().chain(txn.writeset().iter()) {
            woken.extend(lock_manager.release(txn.unique_id(), key));
        }

        let _ = self.txn_results.send(txn);

        for id in woken {
            if let Some(ready) = waiting.remove(&id) {
                self.run_residual_inline(ready, store, lock_manager, waiting);
            }
        }
    }
}
