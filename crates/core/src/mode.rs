//! The seven scheduler protocols a processor can be configured to run.

/// Selects which concurrency-control protocol a `TxnProcessor` runs.
///
/// Every mode shares the same transaction descriptor and the same
/// admission/result queues; only the scheduler thread's internal loop and
/// the storage backend it drives differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CcMode {
    /// No concurrency at all: one transaction runs to completion before the
    /// next is admitted.
    Serial,
    /// Strict two-phase locking, exclusive locks only.
    LockingExclusiveOnly,
    /// Strict two-phase locking with shared and exclusive lock modes.
    Locking,
    /// Optimistic concurrency control with serial (scheduler-thread)
    /// validation.
    Occ,
    /// Optimistic concurrency control with validation parallelized across
    /// worker threads.
    POcc,
    /// Multi-version concurrency control with timestamp ordering.
    Mvcc,
    /// Batched, deterministic execution over conflict clusters discovered
    /// via union-find.
    Strife,
}

impl CcMode {
    /// Human-readable name, used in logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            CcMode::Serial => "serial",
            CcMode::LockingExclusiveOnly => "locking-x",
            CcMode::Locking => "locking-sx",
            CcMode::Occ => "occ",
            CcMode::POcc => "p-occ",
            CcMode::Mvcc => "mvcc-to",
            CcMode::Strife => "strife",
        }
    }
}
