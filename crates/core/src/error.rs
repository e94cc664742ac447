//! Error types for the concurrency-control core
//!
//! Internal scheduler conflicts (lock denied, OCC validation failure, MVCC
//! write-write conflict) are not modeled here: per the failure semantics of
//! every protocol, a conflict is retried silently and never escapes to a
//! caller. `Error` is reserved for the two classes of failure that are not
//! part of normal operation: a transaction program leaving its status in an
//! invalid state, and resource exhaustion while standing up a processor.

use thiserror::Error;

/// Result type alias used throughout the crate family.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the concurrency-control core.
#[derive(Debug, Error)]
pub enum Error {
    /// A transaction's `TxnProgram::run` left `status` as something other
    /// than `CompletedC` or `CompletedA`. This is a bug in caller code, not
    /// a recoverable condition, and the scheduler thread that observes it
    /// terminates the process after logging the offending id.
    #[error("transaction {txn_id} finished in an invalid status: {status:?}")]
    InvalidFinalStatus {
        /// The id of the offending transaction.
        txn_id: u64,
        /// The status it was left in.
        status: crate::txn::TxnStatus,
    },

    /// The worker thread pool could not be spawned, typically because
    /// `std::thread::Builder::spawn` failed or CPU pinning targeted a core
    /// that does not exist on this host.
    #[error("failed to spawn worker thread {index}: {reason}")]
    WorkerSpawnFailed {
        /// Index of the worker that failed to start.
        index: usize,
        /// The underlying OS error message.
        reason: String,
    },

    /// A `ProcessorConfig` value violated a documented invariant (e.g.
    /// `strife_alpha` outside `(0.0, 1.0]`, or zero workers requested).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
