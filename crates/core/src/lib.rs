//! Core types shared by every scheduler protocol
//!
//! This crate defines the foundational vocabulary used throughout the
//! concurrency-control stack:
//! - `Key`/`Value`: the fixed-width scalar types the whole engine operates on
//! - `Transaction`/`TxnStatus`: the transaction descriptor and its lifecycle
//! - `TxnProgram`/`TxnContext`: the callback contract a caller implements to
//!   describe a transaction's body
//! - `CcMode`: the seven scheduler protocols a processor can run
//! - `Error`: the error taxonomy surfaced by the engine

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod mode;
pub mod programs;
pub mod txn;

pub use error::{Error, Result};
pub use mode::CcMode;
pub use programs::{Expect, Noop, Put, Rmw, TxnProgram};
pub use txn::{Key, Transaction, TxnContext, TxnStatus, Value};
