//! The bounded worker pool for foreign calls.
//!
//! Foreign-executor calls run on these workers so the evaluator thread
//! can enforce timeouts. Worker threads warm up foreign thread state at
//! start-up (not on first use) to avoid late-allocation failures.

use crossbeam::channel::{unbounded, Sender};
use once_cell::sync::Lazy;
use std::thread::{self, JoinHandle};

/// Default number of concurrent foreign executions.
pub const DEFAULT_WORKERS: usize = 8;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Sender<Job>,
    _workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn a pool with `size` workers.
    pub fn new(size: usize) -> Self {
        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let rx = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("naab-foreign-{}", i))
                .spawn(move || {
                    crate::adapters::warmup_thread();
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })
                .expect("failed to spawn pool worker");
            workers.push(handle);
        }
        Self {
            sender,
            _workers: workers,
        }
    }

    /// Queue a job. Jobs beyond the worker count wait their turn.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        // Send only fails when every worker is gone, which means the
        // process is tearing down
        let _ = self.sender.send(Box::new(job));
    }
}

/// The process-wide pool, sized to min(DEFAULT_WORKERS, cpus).
pub fn global() -> &'static WorkerPool {
    static POOL: Lazy<WorkerPool> = Lazy::new(|| {
        let size = DEFAULT_WORKERS.min(num_cpus::get().max(1));
        WorkerPool::new(size)
    });
    &POOL
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_pool_runs_jobs() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let c = counter.clone();
            pool.spawn(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 10 {
            assert!(std::time::Instant::now() < deadline, "jobs did not finish");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_global_pool_exists() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        global().spawn(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 1 {
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
    }
}
