//! Fixed-size worker pool for fire-and-forget jobs.
//!
//! Each pool belongs to one connection. Jobs go through an unbounded
//! crossbeam channel, so [`WorkerPool::execute`] never blocks the caller;
//! the number of threads bounds concurrency, not the backlog.

use std::num::NonZeroUsize;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::trace::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool size for `multiplier` workers per available CPU.
///
/// Falls back to one CPU when parallelism cannot be queried; never returns 0.
#[must_use]
pub fn default_size(multiplier: usize) -> NonZeroUsize {
    let cpus = thread::available_parallelism().map_or(1, NonZeroUsize::get);
    NonZeroUsize::new(cpus.saturating_mul(multiplier)).unwrap_or(NonZeroUsize::MIN)
}

/// A fixed set of threads draining a shared job queue.
pub struct WorkerPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers named `{name}-{index}`.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned; workers already
    /// started are shut down before returning.
    pub fn new(size: NonZeroUsize, name: &str) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let mut pool = Self {
            jobs: Some(tx),
            workers: Vec::with_capacity(size.get()),
        };
        for index in 0..size.get() {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&rx))?;
            pool.workers.push(handle);
        }
        debug!(workers = size.get(), "worker pool started");
        Ok(pool)
    }

    /// Queues `job` for execution on some worker.
    ///
    /// Returns `false` if the pool has been shut down.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> bool {
        match &self.jobs {
            Some(jobs) => jobs.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    /// Number of worker threads.
    #[must_use]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting jobs, lets workers drain the queue, and joins them.
    ///
    /// A worker cannot join itself; calling this from inside a job skips
    /// that worker's join.
    pub fn shutdown(&mut self) {
        if self.jobs.take().is_none() {
            return;
        }
        let me = thread::current().id();
        for handle in self.workers.drain(..) {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(jobs: &Receiver<Job>) {
    // `recv` fails once every sender is gone and the queue is empty.
    while let Ok(job) = jobs.recv() {
        job();
    }
}
