//! Engine facade for ccstore
//!
//! This crate wires the lower layers into the one public type client code
//! talks to:
//! - Storage selection, lock manager, worker pool, and scheduler wiring
//!   ([`ccstore_concurrency`])
//! - Configuration ([`ProcessorConfig`])
//!
//! The engine is the only component that knows which protocol a given
//! [`TxnProcessor`] is running; everything beneath it is written generically
//! over all seven.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod processor;

pub use config::ProcessorConfig;
pub use processor::TxnProcessor;

pub use ccstore_core::{CcMode, Error, Expect, Key, Noop, Put, Result, Rmw, Transaction, TxnContext, TxnProgram, TxnStatus, Value};
