//! Bounded Worker Pool
//!
//! The buffering executor only needs a small surface from the pool it feeds:
//! hand it a job, read the active worker count and ready-queue occupancy, and
//! move the core size. [`WorkerPool`] is that surface; [`ThreadPool`] is the
//! implementation shipped with the crate.

mod thread_pool;
mod worker;

pub use thread_pool::ThreadPool;
pub(crate) use worker::panic_message;

use crate::ExecutorError;
use std::fmt;
use std::time::Duration;

/// Unit of work handed to a [`WorkerPool`]
pub trait Job: Send + 'static {
    /// Run the job. May panic; the pool contains the panic.
    fn run(&mut self);

    /// Called once after `run`, whether it returned or panicked, once the
    /// worker no longer counts as active.
    fn complete(self: Box<Self>) {}
}

struct FnJob<F>(Option<F>);

impl<F> Job for FnJob<F>
where
    F: FnOnce() + Send + 'static,
{
    fn run(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Wrap a closure into a boxed [`Job`]
pub fn job<F>(f: F) -> Box<dyn Job>
where
    F: FnOnce() + Send + 'static,
{
    Box::new(FnJob(Some(f)))
}

/// A job the pool refused, handed back unrun
///
/// Returned rather than dropped so callers holding their own locks can drop
/// the job (and whatever it captured) after releasing them.
pub struct RejectedJob {
    /// Why the pool refused the job
    pub error: ExecutorError,

    /// The refused job
    pub job: Box<dyn Job>,
}

impl RejectedJob {
    pub(crate) fn new(job: Box<dyn Job>, error: ExecutorError) -> Self {
        Self { error, job }
    }
}

impl fmt::Debug for RejectedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RejectedJob")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl From<RejectedJob> for ExecutorError {
    fn from(rejected: RejectedJob) -> Self {
        rejected.error
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Live worker threads
    pub workers: usize,

    /// Workers currently running a job
    pub active: usize,

    /// Jobs waiting in the ready queue
    pub queued: usize,

    /// Current core size
    pub core_size: usize,

    /// Highest worker count observed
    pub largest_workers: usize,

    /// Jobs finished (returned or panicked)
    pub completed: u64,
}

/// Thread pool driven by the buffering executor
pub trait WorkerPool: Send + Sync + 'static {
    /// Hand a job to the pool. Fails once the pool is shut down, giving the
    /// job back.
    ///
    /// Must not run the job on the calling thread.
    fn execute(&self, job: Box<dyn Job>) -> Result<(), RejectedJob>;

    /// Workers currently running a job
    fn active_count(&self) -> usize;

    /// Jobs waiting in the ready queue
    fn queue_len(&self) -> usize;

    /// Capacity of the ready queue
    fn queue_capacity(&self) -> usize;

    /// Live worker threads
    fn worker_count(&self) -> usize;

    /// Target number of persistent workers
    fn core_size(&self) -> usize;

    /// Change the target number of persistent workers
    fn set_core_size(&self, size: usize);

    /// Idle keep-alive of worker threads
    fn keep_alive(&self) -> Duration;

    /// Stop accepting jobs; queued jobs still run
    fn shutdown(&self);

    /// Stop accepting jobs and return the ones still queued
    fn shutdown_now(&self) -> Vec<Box<dyn Job>>;

    /// Whether shutdown was requested
    fn is_shutdown(&self) -> bool;

    /// Whether the pool is shut down and every worker has exited
    fn is_terminated(&self) -> bool;

    /// Block until terminated or `timeout` elapses; returns `is_terminated()`
    fn await_termination(&self, timeout: Duration) -> bool;

    /// Snapshot of pool counters
    fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.worker_count(),
            active: self.active_count(),
            queued: self.queue_len(),
            core_size: self.core_size(),
            largest_workers: self.worker_count(),
            completed: 0,
        }
    }
}
