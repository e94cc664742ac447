//! The public facade: submit transactions, retrieve results.

use std::thread;
use std::time::Duration;

use crossbeam_channel::TryRecvError;
use tracing::info;

use ccstore_core::{CcMode, Result, Transaction};
use ccstore_concurrency::{self as concurrency, SchedulerConfig, SchedulerHandle};

use crate::config::ProcessorConfig;

/// How long [`TxnProcessor::get_txn_result`] sleeps between empty polls of
/// the results queue, mirroring the reference implementation's
/// one-microsecond backoff.
const RESULT_POLL_INTERVAL: Duration = Duration::from_micros(1);

/// Wires storage, lock manager, worker pool, and scheduler thread together
/// behind one running concurrency-control core. Construct one per protocol
/// under test; each owns its own storage and scheduler thread.
pub struct TxnProcessor {
    handle: SchedulerHandle,
}

impl TxnProcessor {
    /// Start a processor running `mode`, configured by `config`.
    pub fn new(mode: CcMode, config: ProcessorConfig) -> Result<Self> {
        config.validate()?;
        let scheduler_config = SchedulerConfig {
            workers: config.workers,
            keyspace_size: config.keyspace_size,
            strife_k: config.strife_k,
            strife_alpha: config.strife_alpha,
            strife_batch_window: config.strife_batch_window,
        };
        let handle = concurrency::spawn(mode, scheduler_config)?;
        info!(mode = mode.as_str(), workers = config.workers, "txn processor started");
        Ok(Self { handle })
    }

    /// Submit a transaction for admission. The caller's own `unique_id` is
    /// discarded and replaced with a fresh one drawn from this processor's
    /// id sequence, matching the reference `NewTxnRequest`'s atomic
    /// assign-then-enqueue. Returns the assigned id.
    pub fn new_txn_request(&self, mut txn: Transaction) -> u64 {
        let id = self.handle.alloc_id();
        txn.restart(id);
        let _ = self.handle.requests.send(txn);
        id
    }

    /// Block until the next completed (committed or aborted) transaction is
    /// available, polling the results queue with a short sleep between
    /// attempts rather than parking on a condition variable, matching the
    /// reference implementation's backoff loop.
    pub fn get_txn_result(&self) -> Transaction {
        loop {
            match self.handle.results.try_recv() {
                Ok(txn) => return txn,
                Err(TryRecvError::Empty) => thread::sleep(RESULT_POLL_INTERVAL),
                Err(TryRecvError::Disconnected) => {
                    panic!("scheduler thread exited while a result was still awaited")
                }
            }
        }
    }
}
