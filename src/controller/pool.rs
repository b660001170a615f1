//! Fixed worker pool for request handling.
//!
//! Each worker is an OS thread pulling request jobs off a shared queue.
//! Session-level serialization is the session lock's job, not the pool's:
//! two jobs for the same session may be picked up by two workers, and the
//! second simply blocks on the session mutex.
//!
//! The pool exposes its idle count through [`PoolMonitor`] so a suspended
//! event loop can fail loudly when no worker would remain to service its
//! resume, instead of deadlocking a fully busy deployment.

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send>;

/// Shared view of the pool's capacity, consulted by suspension checks.
#[derive(Debug)]
pub struct PoolMonitor {
    total: AtomicUsize,
    idle: AtomicUsize,
}

impl PoolMonitor {
    /// Creates a standalone monitor (tests and single-threaded embeddings).
    #[must_use]
    pub fn standalone(total: usize, idle: usize) -> Arc<Self> {
        Arc::new(Self {
            total: AtomicUsize::new(total),
            idle: AtomicUsize::new(idle),
        })
    }

    /// Number of workers in the pool.
    #[must_use]
    pub fn total_workers(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Number of workers currently idle.
    #[must_use]
    pub fn idle_workers(&self) -> usize {
        self.idle.load(Ordering::Relaxed)
    }

    fn worker_busy(&self) {
        self.idle.fetch_sub(1, Ordering::Relaxed);
    }

    fn worker_idle(&self) {
        self.idle.fetch_add(1, Ordering::Relaxed);
    }
}

struct PoolShared {
    queue: SegQueue<Job>,
    monitor: Arc<PoolMonitor>,
    shutdown: AtomicBool,
    wakeup: Condvar,
    sleepers: Mutex<usize>,
}

/// A fixed-size worker pool executing request jobs.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` threads named `weft-worker-<n>`.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let shared = Arc::new(PoolShared {
            queue: SegQueue::new(),
            monitor: PoolMonitor::standalone(workers, workers),
            shutdown: AtomicBool::new(false),
            wakeup: Condvar::new(),
            sleepers: Mutex::new(0),
        });

        let handles = (0..workers)
            .map(|i| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("weft-worker-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            shared,
            workers: handles,
        }
    }

    /// The pool's capacity monitor.
    #[must_use]
    pub fn monitor(&self) -> Arc<PoolMonitor> {
        self.shared.monitor.clone()
    }

    /// Enqueues a job; a parked worker is woken to run it.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        self.shared.queue.push(Box::new(job));
        self.shared.wakeup.notify_one();
    }

    /// Number of jobs waiting for a worker.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.shared.queue.len()
    }

    /// Signals shutdown and joins every worker. Queued jobs already
    /// submitted are drained first.
    pub fn shutdown(mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.shared.monitor.total_workers())
            .field("idle", &self.shared.monitor.idle_workers())
            .field("pending", &self.shared.queue.len())
            .finish()
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        if let Some(job) = shared.queue.pop() {
            shared.monitor.worker_busy();
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
            shared.monitor.worker_idle();
            if outcome.is_err() {
                tracing::error!("request job panicked");
            }
            continue;
        }

        if shared.shutdown.load(Ordering::SeqCst) {
            return;
        }

        let mut sleepers = shared.sleepers.lock().expect("pool sleeper lock poisoned");
        *sleepers += 1;
        let (mut sleepers, _) = shared
            .wakeup
            .wait_timeout(sleepers, std::time::Duration::from_millis(50))
            .expect("pool sleeper lock poisoned");
        *sleepers -= 1;
        drop(sleepers);
    }
}
