//! Thread pool with a bounded ready queue and an adjustable core size

use super::{worker, Job, PoolStats, RejectedJob, WorkerPool};
use crate::config::ExecutorConfig;
use crate::ExecutorError;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum RunState {
    /// Accepting jobs
    Running,
    /// Not accepting jobs, draining the ready queue
    Shutdown,
    /// Not accepting jobs, ready queue discarded
    Stop,
    /// Shut down and no workers left
    Terminated,
}

/// Bookkeeping guarded by the pool lock
pub(super) struct PoolState {
    /// Producer side of the ready queue; dropped on shutdown
    sender: Option<Sender<Box<dyn Job>>>,
    pub(super) workers: usize,
    pub(super) core_size: usize,
    largest_workers: usize,
    pub(super) run_state: RunState,
}

/// State shared between the pool handle and its worker threads
pub(super) struct PoolInner {
    pub(super) name: String,
    pub(super) keep_alive: Duration,
    pub(super) allow_core_timeout: AtomicBool,
    capacity: usize,
    max_size: usize,
    pub(super) receiver: Receiver<Box<dyn Job>>,
    pub(super) state: Mutex<PoolState>,
    termination: Condvar,
    pub(super) active: AtomicUsize,
    pub(super) completed: AtomicU64,
    thread_seq: AtomicUsize,
}

impl PoolInner {
    /// Start a worker thread that first runs whatever sits in `first`
    fn start_worker(
        self: &Arc<Self>,
        state: &mut PoolState,
        first: &Arc<Mutex<Option<Box<dyn Job>>>>,
    ) -> io::Result<()> {
        let seq = self.thread_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("{} #{}", self.name, seq);
        let assigned = first.lock().is_some();

        // A worker handed a job counts as active before its thread starts,
        // so back-to-back admissions see it.
        if assigned {
            self.active.fetch_add(1, Ordering::AcqRel);
        }
        state.workers += 1;
        state.largest_workers = state.largest_workers.max(state.workers);

        let inner = Arc::clone(self);
        let handoff = Arc::clone(first);
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            let first = handoff.lock().take();
            worker::run(inner, first)
        });

        match spawned {
            Ok(_) => {
                debug!(thread = %name, workers = state.workers, "Started pool worker");
                Ok(())
            }
            Err(e) => {
                state.workers -= 1;
                if assigned {
                    self.active.fetch_sub(1, Ordering::AcqRel);
                }
                Err(e)
            }
        }
    }

    /// Start a worker running `job` first; a failed start hands the job back
    fn spawn_worker(
        self: &Arc<Self>,
        state: &mut PoolState,
        job: Box<dyn Job>,
    ) -> Result<(), RejectedJob> {
        let slot = Arc::new(Mutex::new(Some(job)));
        let Err(e) = self.start_worker(state, &slot) else {
            return Ok(());
        };
        let unstarted = slot.lock().take();
        match unstarted {
            Some(job) => Err(RejectedJob::new(job, ExecutorError::ThreadSpawn(e))),
            // An empty slot means the thread did start and took the job
            None => Ok(()),
        }
    }

    /// Start a worker that waits on the ready queue
    fn spawn_idle_worker(self: &Arc<Self>, state: &mut PoolState) -> io::Result<()> {
        self.start_worker(state, &Arc::new(Mutex::new(None)))
    }

    fn refuse(&self, job: Box<dyn Job>) -> RejectedJob {
        RejectedJob::new(
            job,
            ExecutorError::Rejected(format!("pool {} is shut down", self.name)),
        )
    }

    /// Account for a worker leaving. Caller holds the pool lock.
    pub(super) fn retire(&self, state: &mut PoolState) {
        state.workers -= 1;
        self.try_terminate(state);
    }

    fn try_terminate(&self, state: &mut PoolState) {
        let stopping = matches!(state.run_state, RunState::Shutdown | RunState::Stop);
        if stopping && state.workers == 0 && self.receiver.is_empty() {
            state.run_state = RunState::Terminated;
            self.termination.notify_all();
            info!(pool = %self.name, "Pool terminated");
        }
    }
}

/// Thread pool with a bounded ready queue
///
/// Admission follows the classic core/queue/overflow order: below the core
/// size a new worker takes the job directly, otherwise the job waits in the
/// ready queue, and when that is full an extra worker is started as long as
/// the maximum size allows it. Idle workers retire after the keep-alive,
/// core workers included.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

impl ThreadPool {
    /// Create a new pool
    ///
    /// `capacity` bounds the ready queue; `max_size` bounds the number of
    /// worker threads (`usize::MAX` for unbounded).
    pub fn new(
        core_size: usize,
        max_size: usize,
        keep_alive: Duration,
        capacity: usize,
        name: impl Into<String>,
    ) -> Self {
        let (sender, receiver) = channel::bounded(capacity);

        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                keep_alive,
                allow_core_timeout: AtomicBool::new(true),
                capacity,
                max_size: max_size.max(1),
                receiver,
                state: Mutex::new(PoolState {
                    sender: Some(sender),
                    workers: 0,
                    core_size,
                    largest_workers: 0,
                    run_state: RunState::Running,
                }),
                termination: Condvar::new(),
                active: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                thread_seq: AtomicUsize::new(0),
            }),
        }
    }

    /// Pool shaped for a buffering executor: unbounded maximum size, ready
    /// queue of `max_primary_queue_size`, core threads time out
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(
            config.core_size,
            usize::MAX,
            config.keep_alive,
            config.max_primary_queue_size,
            config.thread_name.clone(),
        )
    }

    /// Let core workers retire after the keep-alive (on by default)
    pub fn allow_core_thread_timeout(&self, allow: bool) {
        self.inner.allow_core_timeout.store(allow, Ordering::Release);
    }

    /// Worker thread name prefix
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl WorkerPool for ThreadPool {
    // Refused jobs are returned, never dropped under the pool lock
    fn execute(&self, job: Box<dyn Job>) -> Result<(), RejectedJob> {
        let mut state = self.inner.state.lock();

        if state.run_state != RunState::Running {
            return Err(self.inner.refuse(job));
        }

        if state.workers < state.core_size {
            return self.inner.spawn_worker(&mut state, job);
        }

        let offered = match &state.sender {
            Some(sender) => sender.try_send(job),
            None => return Err(self.inner.refuse(job)),
        };

        match offered {
            Ok(()) => {
                if state.workers == 0 {
                    if let Err(e) = self.inner.spawn_idle_worker(&mut state) {
                        warn!(pool = %self.inner.name, error = %e, "No worker available for queued job");
                    }
                }
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                if state.workers < self.inner.max_size {
                    self.inner.spawn_worker(&mut state, job)
                } else {
                    let error = ExecutorError::Rejected(format!(
                        "pool {} is saturated ({} workers, {} queued)",
                        self.inner.name, state.workers, self.inner.capacity
                    ));
                    Err(RejectedJob::new(job, error))
                }
            }
            Err(TrySendError::Disconnected(job)) => Err(self.inner.refuse(job)),
        }
    }

    fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    fn queue_len(&self) -> usize {
        self.inner.receiver.len()
    }

    fn queue_capacity(&self) -> usize {
        self.inner.capacity
    }

    fn worker_count(&self) -> usize {
        self.inner.state.lock().workers
    }

    fn core_size(&self) -> usize {
        self.inner.state.lock().core_size
    }

    fn set_core_size(&self, size: usize) {
        let mut state = self.inner.state.lock();
        let previous = state.core_size;
        if previous == size {
            return;
        }
        state.core_size = size;
        debug!(pool = %self.inner.name, from = previous, to = size, "Core size changed");

        // Queued jobs get fresh workers right away; surplus workers are left
        // to the keep-alive.
        if size > previous && state.run_state == RunState::Running {
            let mut pending = (size - previous).min(self.inner.receiver.len());
            while pending > 0 && state.workers < state.core_size {
                if let Err(e) = self.inner.spawn_idle_worker(&mut state) {
                    warn!(pool = %self.inner.name, error = %e, "Failed to grow pool");
                    break;
                }
                pending -= 1;
            }
        }
    }

    fn keep_alive(&self) -> Duration {
        self.inner.keep_alive
    }

    fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        if state.run_state == RunState::Running {
            state.run_state = RunState::Shutdown;
            info!(pool = %self.inner.name, workers = state.workers, "Pool shutting down");
        }
        // Dropping the sender lets idle workers observe the disconnect once
        // the ready queue is drained.
        state.sender.take();
        self.inner.try_terminate(&mut state);
    }

    fn shutdown_now(&self) -> Vec<Box<dyn Job>> {
        let mut state = self.inner.state.lock();
        if state.run_state < RunState::Stop {
            state.run_state = RunState::Stop;
            info!(pool = %self.inner.name, workers = state.workers, "Pool stopping");
        }
        state.sender.take();
        let drained: Vec<_> = self.inner.receiver.try_iter().collect();
        self.inner.try_terminate(&mut state);
        drained
    }

    fn is_shutdown(&self) -> bool {
        self.inner.state.lock().run_state != RunState::Running
    }

    fn is_terminated(&self) -> bool {
        self.inner.state.lock().run_state == RunState::Terminated
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.run_state != RunState::Terminated {
            if self
                .inner
                .termination
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        state.run_state == RunState::Terminated
    }

    fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            workers: state.workers,
            active: self.inner.active.load(Ordering::Acquire),
            queued: self.inner.receiver.len(),
            core_size: state.core_size,
            largest_workers: state.largest_workers,
            completed: self.inner.completed.load(Ordering::Acquire),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        WorkerPool::shutdown(self);
    }
}
