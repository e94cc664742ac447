//! Lock managers, worker pool, union-find, active-set registry, and the
//! seven scheduler protocol loops built on top of [`ccstore_storage`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod active_set;
pub mod lock_manager;
pub mod scheduler;
pub mod union_find;
pub mod worker_pool;

pub use active_set::ActiveSet;
pub use lock_manager::{LockManagerA, LockManagerB, LockMode};
pub use scheduler::{spawn, SchedulerConfig, SchedulerError, SchedulerHandle};
pub use worker_pool::WorkerPool;
