//! Minimal deterministic transaction programs used by tests and demos.
//!
//! The general-purpose transaction body language is a caller concern: real
//! programs implement [`TxnProgram`] directly (or just hand a closure to
//! [`crate::Transaction::new`]). The handful of programs below exist because
//! the testable properties every scheduler must satisfy — isolation under
//! concurrent increments, read-your-writes, snapshot consistency — all need
//! a small vocabulary of deterministic, explicit-set transaction bodies to
//! exercise them without pulling in a full workload generator.

use std::collections::{BTreeMap, BTreeSet};

use crate::txn::{Key, TxnContext, Value};

/// A runnable transaction body.
///
/// Implementors read keys via [`TxnContext::read`], buffer writes via
/// [`TxnContext::write`], and must call exactly one of
/// [`TxnContext::commit`]/[`TxnContext::abort`] before returning.
pub trait TxnProgram: Send {
    /// Execute the transaction's logic against `ctx`.
    fn run(&mut self, ctx: &mut TxnContext);
}

impl<F> TxnProgram for F
where
    F: FnMut(&mut TxnContext) + Send,
{
    fn run(&mut self, ctx: &mut TxnContext) {
        self(ctx)
    }
}

/// Commits immediately without touching any key.
#[derive(Debug, Default, Clone, Copy)]
pub struct Noop;

impl TxnProgram for Noop {
    fn run(&mut self, ctx: &mut TxnContext) {
        ctx.commit();
    }
}

/// Writes every pair in the map, then commits.
#[derive(Debug, Clone)]
pub struct Put(pub BTreeMap<Key, Value>);

impl TxnProgram for Put {
    fn run(&mut self, ctx: &mut TxnContext) {
        for (&key, &value) in &self.0 {
            ctx.write(key, value);
        }
        ctx.commit();
    }
}

/// Reads every key in the map and aborts if any observed value disagrees
/// with what was expected; commits otherwise.
#[derive(Debug, Clone)]
pub struct Expect(pub BTreeMap<Key, Value>);

impl TxnProgram for Expect {
    fn run(&mut self, ctx: &mut TxnContext) {
        for (&key, &expected) in &self.0 {
            let observed = ctx.read(key).unwrap_or(0);
            if observed != expected {
                ctx.abort();
                return;
            }
        }
        ctx.commit();
    }
}

/// Read-modify-write over an explicit read set and write set: every key in
/// `readset` is read (and discarded), then every key in `writeset` is
/// incremented by one, treating a missing read as `0`.
#[derive(Debug, Clone)]
pub struct Rmw {
    /// Keys read but not written.
    pub readset: BTreeSet<Key>,
    /// Keys read and then incremented.
    pub writeset: BTreeSet<Key>,
}

impl TxnProgram for Rmw {
    fn run(&mut self, ctx: &mut TxnContext) {
        for &key in &self.readset {
            ctx.read(key);
        }
        for &key in &self.writeset {
            let current = ctx.read(key).unwrap_or(0);
            ctx.write(key, current + 1);
        }
        ctx.commit();
    }
}
