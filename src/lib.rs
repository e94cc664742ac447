//! # ccstore
//!
//! The concurrency-control core of a main-memory transactional key-value
//! engine: one transaction/storage abstraction, seven interchangeable
//! scheduler protocols (serial, 2PL-X, 2PL-SX, OCC, P-OCC, MVCC-TO, and
//! Strife's batched deterministic execution).
//!
//! # Quick Start
//!
//! ```no_run
//! use ccstore::{CcMode, ProcessorConfig, Rmw, Transaction, TxnProcessor, TxnStatus};
//! use std::collections::BTreeSet;
//!
//! let processor = TxnProcessor::new(CcMode::Occ, ProcessorConfig::default())?;
//!
//! let txn = Transaction::new(
//!     0,
//!     BTreeSet::new(),
//!     BTreeSet::from([42]),
//!     Rmw { readset: BTreeSet::new(), writeset: BTreeSet::from([42]) },
//! );
//! processor.new_txn_request(txn);
//! let result = processor.get_txn_result();
//! assert_eq!(result.status(), TxnStatus::Committed);
//! # Ok::<(), ccstore::Error>(())
//! ```
//!
//! # Architecture
//!
//! [`TxnProcessor`] is the only entry point client code needs. Everything
//! beneath it (storage, lock managers, worker pool, scheduler thread) lives
//! in internal crates and is not re-exported here.

pub use ccstore_engine::*;
