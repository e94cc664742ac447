//! A fixed-size, CPU-pinned thread pool that runs arbitrary jobs to
//! completion. Every protocol's execution phase (user `Run`, OCC/P-OCC
//! read-and-validate, MVCC-TO's read/write phases, Strife's per-cluster
//! conflict-free execution) is submitted here rather than run inline on the
//! scheduler thread.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use ccstore_core::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size worker pool. Workers are pinned to the first `size` CPU ids
/// the host reports, best-effort: a host that cannot enumerate cores (or
/// has fewer than `size`) simply leaves the remaining workers unpinned.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` worker threads.
    pub fn new(size: usize) -> Result<Self> {
        let (sender, receiver): (Sender<Job>, Receiver<Job>) = crossbeam_channel::unbounded();
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        let mut handles = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = receiver.clone();
            let pin = core_ids.get(index).copied();
            let handle = thread::Builder::new()
                .name(format!("ccstore-worker-{index}"))
                .spawn(move || {
                    if let Some(core) = pin {
                        if !core_affinity::set_for_current(core) {
                            warn!(worker = index, ?core, "failed to pin worker to core");
                        }
                    }
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                    debug!(worker = index, "worker pool thread exiting");
                })
                .map_err(|e| Error::WorkerSpawnFailed {
                    index,
                    reason: e.to_string(),
                })?;
            handles.push(handle);
        }
        Ok(Self {
            sender: Some(sender),
            handles,
        })
    }

    /// Number of worker threads in the pool.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Submit a job for execution on the next available worker.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(job));
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping the sender closes the channel, which is what lets each
        // worker's `recv` loop observe end-of-stream and exit; only then can
        // `join` return. Field-declaration order would otherwise drop
        // `handles` first and block forever on threads still parked in
        // `recv`, so the close has to happen explicitly, first.
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn submitted_jobs_all_run() {
        let pool = WorkerPool::new(3).expect("pool should spawn");
        let counter = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(20);
        for _ in 0..20 {
            let counter = counter.clone();
            let done_tx = done_tx.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = done_tx.send(());
            });
        }
        for _ in 0..20 {
            done_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }
}
