//! Secondary backlog and admission loop
//!
//! Every submission lands at the back of an unbounded FIFO backlog. A task
//! leaves the backlog only when the pool has room for it: its ready queue is
//! within `max_primary_queue_size` and fewer workers are busy than the
//! current core size. Admission is attempted on every submission and after
//! every task completion. Each attempt first resizes the pool's core
//! concurrency from the backlog depth, then admits at most the backlog head.
//!
//! One lock guards the backlog and the hand-off marker. Pool calls made
//! under that lock must not run the job on the calling thread, since the
//! job's completion re-enters the scheduler. Tasks the pool refuses are
//! dropped only after the lock is released.

use super::flight::{FlightRecorder, LogSink, StaleTaskSink};
use super::task::{Task, TaskId};
use super::tuning::CoreBand;
use crate::config::ExecutorConfig;
use crate::executor::{Executor, ExecutorService, Work};
use crate::pool::{Job, PoolStats, ThreadPool, WorkerPool};
use crate::ExecutorResult;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Jobs the pool refused during a pass, dropped once the lock is released
type Refused = Vec<Box<dyn Job>>;

/// State guarded by the buffer lock
struct BufferState {
    /// Tasks waiting for pool capacity, oldest first
    queue: VecDeque<Task>,

    /// Task being handed to the pool. Set and cleared inside `admit`, so
    /// only the admitting caller ever sees it set.
    handoff: Option<TaskId>,

    /// Band the pool was last tuned to
    band: CoreBand,
}

struct Shared<P> {
    config: ExecutorConfig,
    pool: P,
    state: Mutex<BufferState>,
    flight: Option<FlightRecorder>,
    main_thread: Option<ThreadId>,
    admitted: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    peak_backlog: AtomicUsize,
}

impl<P: WorkerPool> Shared<P> {
    fn on_main_thread(&self) -> bool {
        self.main_thread == Some(thread::current().id())
    }

    /// One admission pass. Caller holds the buffer lock and drops the
    /// returned jobs after releasing it.
    fn schedule_next(&self, state: &mut BufferState) -> Refused {
        let mut refused = Refused::new();

        if self.pool.is_shutdown() {
            // The pool refuses everything now; the gate no longer applies
            while let Some(task) = state.queue.pop_front() {
                refused.extend(self.admit(state, task));
            }
            return refused;
        }

        if self.on_main_thread() {
            // The main thread never waits on pool capacity
            if let Some(task) = state.queue.pop_front() {
                refused.extend(self.admit(state, task));
            }
            return refused;
        }

        let active = self.pool.active_count();
        let queued = self.pool.queue_len();
        let core_size = self.retune(state);

        if queued <= self.config.max_primary_queue_size && active < core_size {
            if let Some(task) = state.queue.pop_front() {
                refused.extend(self.admit(state, task));
            }
        }
        refused
    }

    /// Resize the pool's core concurrency for the current backlog
    fn retune(&self, state: &mut BufferState) -> usize {
        let backlog = state.queue.len();
        let band = CoreBand::for_backlog(backlog, &self.config);
        let target = band.core_size(&self.config);

        if band != state.band {
            debug!(?band, backlog, core_size = target, "Core band changed");
            state.band = band;
        }
        if self.pool.core_size() != target {
            self.pool.set_core_size(target);
        }
        target
    }

    /// Hand one task to the pool; returns it if the pool refused it
    fn admit(&self, state: &mut BufferState, mut task: Task) -> Option<Box<dyn Job>> {
        let id = task.id();
        debug_assert!(state.handoff.is_none(), "nested admission");
        state.handoff = Some(id);

        if let Some(flight) = &self.flight {
            flight.admitted(id, task.take_trace());
        }

        let refused = match self.pool.execute(Box::new(task)) {
            Ok(()) => {
                self.admitted.fetch_add(1, Ordering::Relaxed);
                debug!(task = %id, backlog = state.queue.len(), "Task admitted to pool");
                None
            }
            Err(rejected) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                if let Some(flight) = &self.flight {
                    flight.completed(id);
                }
                warn!(task = %id, error = %rejected.error, "Pool rejected task; dropping it");
                Some(rejected.job)
            }
        };

        state.handoff = None;
        refused
    }
}

/// Completion hook installed on every task
fn on_task_complete<P: WorkerPool>(shared: &Weak<Shared<P>>, id: TaskId) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    if let Some(flight) = &shared.flight {
        flight.completed(id);
    }
    let refused = {
        let mut state = shared.state.lock();
        shared.schedule_next(&mut state)
    };
    drop(refused);
}

/// Counters of a [`BufferExecutor`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Tasks waiting in the backlog
    pub backlog: usize,

    /// Tasks handed to the pool
    pub admitted: u64,

    /// Tasks the pool refused
    pub rejected: u64,

    /// Submissions dropped because the executor was shut down
    pub dropped: u64,

    /// Longest backlog observed
    pub peak_backlog: usize,

    /// Tasks in flight; `None` unless diagnostics are enabled
    pub in_flight: Option<usize>,

    /// Pool counters
    pub pool: PoolStats,
}

/// Two-tier executor: unbounded backlog feeding a bounded worker pool
///
/// `execute` never blocks beyond a short critical section and never reports
/// failure to the caller. Tasks reach the pool in submission order.
pub struct BufferExecutor<P: WorkerPool = ThreadPool> {
    shared: Arc<Shared<P>>,
}

impl<P: WorkerPool> Clone for BufferExecutor<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl BufferExecutor<ThreadPool> {
    /// Executor over a [`ThreadPool`] shaped by `config`
    pub fn new(config: ExecutorConfig) -> ExecutorResult<Self> {
        Self::builder(config).build()
    }

    /// Start building an executor; the pool type is picked by the build call
    pub fn builder(config: ExecutorConfig) -> BufferExecutorBuilder {
        BufferExecutorBuilder::new(config)
    }
}

impl<P: WorkerPool> BufferExecutor<P> {
    /// Submit a closure
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Box::new(f));
    }

    fn enqueue(&self, work: Work) {
        let shared = &self.shared;

        if shared.pool.is_shutdown() {
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Executor is shut down; dropping task");
            return;
        }

        let trace = match &shared.flight {
            Some(flight) => {
                flight.scan();
                FlightRecorder::capture_trace()
            }
            None => String::new(),
        };

        let weak = Arc::downgrade(shared);
        let task = Task::new(work, trace, move |id| on_task_complete(&weak, id));

        let refused = {
            let mut state = shared.state.lock();
            state.queue.push_back(task);
            shared.peak_backlog.fetch_max(state.queue.len(), Ordering::Relaxed);
            shared.schedule_next(&mut state)
        };
        drop(refused);
    }

    /// Tasks waiting in the backlog
    pub fn backlog(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// The pool this executor feeds
    pub fn pool(&self) -> &P {
        &self.shared.pool
    }

    /// Effective configuration
    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    /// In-flight registry; `None` unless diagnostics are enabled
    pub fn diagnostics(&self) -> Option<&FlightRecorder> {
        self.shared.flight.as_ref()
    }

    /// Snapshot of executor and pool counters
    pub fn stats(&self) -> BufferStats {
        let backlog = self.backlog();
        BufferStats {
            backlog,
            admitted: self.shared.admitted.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            peak_backlog: self.shared.peak_backlog.load(Ordering::Relaxed),
            in_flight: self.shared.flight.as_ref().map(FlightRecorder::len),
            pool: self.shared.pool.stats(),
        }
    }

    /// Shut the pool down. Jobs already in the pool still run; the backlog
    /// is offered to the stopped pool, which refuses every task.
    pub fn shutdown(&self) {
        self.shared.pool.shutdown();

        let refused = {
            let mut state = self.shared.state.lock();
            info!(backlog = state.queue.len(), "Executor shutting down");
            self.shared.schedule_next(&mut state)
        };
        drop(refused);
    }

    /// Stop now; returns the pool's queued jobs followed by the backlog
    pub fn shutdown_now(&self) -> Vec<Box<dyn Job>> {
        let backlog: Vec<Task> = self.shared.state.lock().queue.drain(..).collect();

        let mut pending = self.shared.pool.shutdown_now();
        info!(
            pool_queued = pending.len(),
            backlog = backlog.len(),
            "Executor stopped"
        );
        pending.extend(backlog.into_iter().map(|task| Box::new(task) as Box<dyn Job>));
        pending
    }

    /// Whether the pool was shut down
    pub fn is_shutdown(&self) -> bool {
        self.shared.pool.is_shutdown()
    }

    /// Whether the pool has terminated
    pub fn is_terminated(&self) -> bool {
        self.shared.pool.is_terminated()
    }

    /// Block until the pool terminates or `timeout` elapses
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.shared.pool.await_termination(timeout)
    }
}

impl<P: WorkerPool> Executor for BufferExecutor<P> {
    fn execute(&self, work: Work) -> ExecutorResult<()> {
        self.enqueue(work);
        Ok(())
    }
}

impl<P: WorkerPool> ExecutorService for BufferExecutor<P> {
    fn shutdown(&self) {
        BufferExecutor::shutdown(self)
    }

    fn shutdown_now(&self) -> Vec<Box<dyn Job>> {
        BufferExecutor::shutdown_now(self)
    }

    fn is_shutdown(&self) -> bool {
        BufferExecutor::is_shutdown(self)
    }

    fn is_terminated(&self) -> bool {
        BufferExecutor::is_terminated(self)
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        BufferExecutor::await_termination(self, timeout)
    }
}

impl<P: WorkerPool> std::fmt::Debug for BufferExecutor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferExecutor")
            .field("backlog", &self.backlog())
            .field("core_size", &self.shared.pool.core_size())
            .field("debug", &self.shared.flight.is_some())
            .finish()
    }
}

/// Builder for [`BufferExecutor`]
pub struct BufferExecutorBuilder {
    config: ExecutorConfig,
    main_thread: Option<ThreadId>,
    sink: Option<Arc<dyn StaleTaskSink>>,
}

impl BufferExecutorBuilder {
    fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            main_thread: None,
            sink: None,
        }
    }

    /// Thread whose submissions bypass the admission gate
    pub fn main_thread(mut self, id: ThreadId) -> Self {
        self.main_thread = Some(id);
        self
    }

    /// Receiver of stale task reports (defaults to [`LogSink`])
    pub fn stale_sink(mut self, sink: Arc<dyn StaleTaskSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build over a [`ThreadPool`] shaped by the configuration
    pub fn build(self) -> ExecutorResult<BufferExecutor<ThreadPool>> {
        self.config.validate()?;
        let pool = ThreadPool::from_config(&self.config);
        self.build_with_pool(pool)
    }

    /// Build over a caller-supplied pool
    pub fn build_with_pool<P: WorkerPool>(self, pool: P) -> ExecutorResult<BufferExecutor<P>> {
        self.config.validate()?;

        let flight = self.config.debug.then(|| {
            let sink = self.sink.unwrap_or_else(|| Arc::new(LogSink));
            FlightRecorder::new(pool.keep_alive(), sink)
        });

        info!(
            core_size = self.config.core_size,
            bigger_core_size = self.config.bigger_core_size,
            max_core_size = self.config.max_core_size,
            max_primary_queue_size = self.config.max_primary_queue_size,
            debug = self.config.debug,
            "Buffer executor created"
        );

        Ok(BufferExecutor {
            shared: Arc::new(Shared {
                config: self.config,
                pool,
                state: Mutex::new(BufferState {
                    queue: VecDeque::new(),
                    handoff: None,
                    band: CoreBand::Steady,
                }),
                flight,
                main_thread: self.main_thread,
                admitted: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                peak_backlog: AtomicUsize::new(0),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorExt;
    use crate::pool::RejectedJob;
    use crate::scheduler::flight::StaleTask;
    use crate::ExecutorError;
    use std::sync::atomic::AtomicBool;

    /// Pool that holds jobs until the test finishes them
    ///
    /// Every accepted job counts as active until `finish_one` runs it.
    struct ManualPool {
        jobs: Mutex<VecDeque<Box<dyn Job>>>,
        queued: AtomicUsize,
        core: AtomicUsize,
        core_changes: Mutex<Vec<usize>>,
        reject: AtomicBool,
        shut_down: AtomicBool,
    }

    impl ManualPool {
        fn new(core: usize) -> Self {
            Self {
                jobs: Mutex::new(VecDeque::new()),
                queued: AtomicUsize::new(0),
                core: AtomicUsize::new(core),
                core_changes: Mutex::new(Vec::new()),
                reject: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
            }
        }

        fn running(&self) -> usize {
            self.jobs.lock().len()
        }

        /// Run the oldest job to completion on the calling thread
        fn finish_one(&self) -> bool {
            let job = self.jobs.lock().pop_front();
            match job {
                Some(mut job) => {
                    job.run();
                    job.complete();
                    true
                }
                None => false,
            }
        }

        fn finish_all(&self) {
            while self.finish_one() {}
        }
    }

    impl WorkerPool for ManualPool {
        fn execute(&self, job: Box<dyn Job>) -> Result<(), RejectedJob> {
            if self.reject.load(Ordering::SeqCst) || self.shut_down.load(Ordering::SeqCst) {
                let error = ExecutorError::Rejected("manual pool".to_string());
                return Err(RejectedJob::new(job, error));
            }
            self.jobs.lock().push_back(job);
            Ok(())
        }

        fn active_count(&self) -> usize {
            self.running()
        }

        fn queue_len(&self) -> usize {
            self.queued.load(Ordering::SeqCst)
        }

        fn queue_capacity(&self) -> usize {
            10
        }

        fn worker_count(&self) -> usize {
            self.running()
        }

        fn core_size(&self) -> usize {
            self.core.load(Ordering::SeqCst)
        }

        fn set_core_size(&self, size: usize) {
            self.core.store(size, Ordering::SeqCst);
            self.core_changes.lock().push(size);
        }

        fn keep_alive(&self) -> Duration {
            Duration::from_secs(30)
        }

        fn shutdown(&self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }

        fn shutdown_now(&self) -> Vec<Box<dyn Job>> {
            self.shut_down.store(true, Ordering::SeqCst);
            Vec::new()
        }

        fn is_shutdown(&self) -> bool {
            self.shut_down.load(Ordering::SeqCst)
        }

        fn is_terminated(&self) -> bool {
            self.is_shutdown() && self.running() == 0
        }

        fn await_termination(&self, _timeout: Duration) -> bool {
            self.is_terminated()
        }
    }

    /// Pool that parks accepted jobs in its ready queue; the active count is
    /// set by the test
    struct QueueingPool {
        ready: Mutex<VecDeque<Box<dyn Job>>>,
        active: AtomicUsize,
        core: AtomicUsize,
    }

    impl QueueingPool {
        fn new(core: usize) -> Self {
            Self {
                ready: Mutex::new(VecDeque::new()),
                active: AtomicUsize::new(0),
                core: AtomicUsize::new(core),
            }
        }

        fn ready_len(&self) -> usize {
            self.ready.lock().len()
        }
    }

    impl WorkerPool for QueueingPool {
        fn execute(&self, job: Box<dyn Job>) -> Result<(), RejectedJob> {
            self.ready.lock().push_back(job);
            Ok(())
        }

        fn active_count(&self) -> usize {
            self.active.load(Ordering::SeqCst)
        }

        fn queue_len(&self) -> usize {
            self.ready_len()
        }

        fn queue_capacity(&self) -> usize {
            usize::MAX
        }

        fn worker_count(&self) -> usize {
            self.active_count()
        }

        fn core_size(&self) -> usize {
            self.core.load(Ordering::SeqCst)
        }

        fn set_core_size(&self, size: usize) {
            self.core.store(size, Ordering::SeqCst);
        }

        fn keep_alive(&self) -> Duration {
            Duration::from_secs(30)
        }

        fn shutdown(&self) {}

        fn shutdown_now(&self) -> Vec<Box<dyn Job>> {
            self.ready.lock().drain(..).collect()
        }

        fn is_shutdown(&self) -> bool {
            false
        }

        fn is_terminated(&self) -> bool {
            false
        }

        fn await_termination(&self, _timeout: Duration) -> bool {
            false
        }
    }

    /// Submits to the executor it holds when dropped
    struct ResubmitOnDrop(Option<BufferExecutor<ManualPool>>);

    impl Drop for ResubmitOnDrop {
        fn drop(&mut self) {
            if let Some(executor) = self.0.take() {
                executor.execute(|| {});
            }
        }
    }

    fn config(core: usize) -> ExecutorConfig {
        ExecutorConfig::for_parallelism(4)
            .with_core_size(core)
            .with_bigger_core_size(core.max(4))
            .with_max_core_size(core.max(8))
    }

    fn executor(config: ExecutorConfig) -> BufferExecutor<ManualPool> {
        let core = config.core_size;
        BufferExecutor::builder(config)
            .build_with_pool(ManualPool::new(core))
            .unwrap()
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<StaleTask>>);

    impl StaleTaskSink for Collect {
        fn report(&self, stale: &StaleTask) {
            self.0.lock().push(stale.clone());
        }
    }

    #[test]
    fn test_idle_executor_admits_immediately() {
        let executor = executor(config(3));
        for _ in 0..3 {
            executor.execute(|| {});
        }

        assert_eq!(executor.pool().running(), 3);
        assert_eq!(executor.backlog(), 0);
        assert_eq!(executor.stats().admitted, 3);
    }

    #[test]
    fn test_busy_pool_holds_backlog() {
        let executor = executor(config(3));
        for _ in 0..5 {
            executor.execute(|| {});
        }
        assert_eq!(executor.pool().running(), 3);
        assert_eq!(executor.backlog(), 2);

        // Each completion frees one slot
        assert!(executor.pool().finish_one());
        assert_eq!(executor.pool().running(), 3);
        assert_eq!(executor.backlog(), 1);

        executor.pool().finish_all();
        assert_eq!(executor.backlog(), 0);
        assert_eq!(executor.stats().admitted, 5);
    }

    #[test]
    fn test_full_ready_queue_closes_gate() {
        let executor = executor(config(3));
        executor.pool().queued.store(11, Ordering::SeqCst);

        executor.execute(|| {});
        assert_eq!(executor.pool().running(), 0);
        assert_eq!(executor.backlog(), 1);

        // At the bound the gate is open again, for the head only
        executor.pool().queued.store(10, Ordering::SeqCst);
        executor.execute(|| {});
        assert_eq!(executor.pool().running(), 1);
        assert_eq!(executor.backlog(), 1);
    }

    #[test]
    fn test_one_admission_per_pass() {
        let config = config(3).with_max_primary_queue_size(1);
        let executor = BufferExecutor::builder(config)
            .build_with_pool(QueueingPool::new(3))
            .unwrap();

        executor.pool().active.store(3, Ordering::SeqCst);
        for _ in 0..4 {
            executor.execute(|| {});
        }
        assert_eq!(executor.backlog(), 4);
        assert_eq!(executor.pool().ready_len(), 0);

        // Workers free up: the next pass hands over the head and nothing more
        executor.pool().active.store(0, Ordering::SeqCst);
        executor.execute(|| {});
        assert_eq!(executor.pool().ready_len(), 1);
        assert_eq!(executor.backlog(), 4);

        // The ready queue is re-read each pass; once past the bound the gate
        // stays shut
        for _ in 0..5 {
            executor.execute(|| {});
            assert!(executor.pool().ready_len() <= 2);
        }
        assert_eq!(executor.pool().ready_len(), 2);
        assert_eq!(executor.backlog(), 8);
        assert_eq!(executor.stats().admitted, 2);
    }

    #[test]
    fn test_backlog_raises_core_size() {
        let config = ExecutorConfig::for_parallelism(4)
            .with_core_size(1)
            .with_bigger_core_size(4)
            .with_max_core_size(8)
            .with_max_primary_queue_size(1);
        let executor = executor(config);

        // One admitted, ten waiting: still the steady band
        for _ in 0..11 {
            executor.execute(|| {});
        }
        assert_eq!(executor.pool().core_size(), 1);
        assert_eq!(executor.backlog(), 10);

        // Eleven waiting: bigger band, one more admitted
        executor.execute(|| {});
        assert_eq!(executor.pool().core_size(), 4);
        assert_eq!(executor.pool().running(), 2);
        assert_eq!(executor.backlog(), 10);

        for _ in 0..150 {
            executor.execute(|| {});
        }
        assert_eq!(executor.pool().core_size(), 8);
        assert_eq!(executor.pool().running(), 8);
        let changes = executor.pool().core_changes.lock().clone();
        assert!(changes.contains(&4));
        assert!(changes.contains(&8));
        assert!(changes.iter().all(|size| [1, 4, 8].contains(size)));
    }

    #[test]
    fn test_rejection_is_swallowed() {
        let executor = executor(config(3).with_debug(true));
        executor.pool().reject.store(true, Ordering::SeqCst);

        assert!(Executor::execute(&executor, Box::new(|| {})).is_ok());
        let stats = executor.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.admitted, 0);
        assert_eq!(stats.backlog, 0);
        assert_eq!(stats.in_flight, Some(0));
    }

    #[test]
    fn test_rejected_task_reports_dropped() {
        let executor = executor(config(3));
        executor.pool().reject.store(true, Ordering::SeqCst);

        let handle = executor.submit(|| 5).unwrap();
        assert!(matches!(handle.join(), Err(ExecutorError::TaskDropped)));
    }

    #[test]
    fn test_main_thread_bypasses_gate() {
        let executor = BufferExecutor::builder(config(1))
            .main_thread(thread::current().id())
            .build_with_pool(ManualPool::new(1))
            .unwrap();
        executor.pool().queued.store(100, Ordering::SeqCst);

        for _ in 0..3 {
            executor.execute(|| {});
        }
        assert_eq!(executor.pool().running(), 3);
        assert_eq!(executor.backlog(), 0);

        // Other threads still wait for capacity
        let other = executor.clone();
        thread::spawn(move || other.execute(|| {})).join().unwrap();
        assert_eq!(executor.pool().running(), 3);
        assert_eq!(executor.backlog(), 1);
    }

    #[test]
    fn test_fifo_admission() {
        let executor = executor(config(1));
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..6 {
            let order = order.clone();
            executor.execute(move || order.lock().push(i));
        }
        executor.pool().finish_all();

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_shutdown_refuses_backlog() {
        let executor = executor(config(1));
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        executor.execute(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let waiting: Vec<_> = (0..2).map(|i| executor.submit(move || i).unwrap()).collect();
        assert_eq!(executor.backlog(), 2);

        executor.shutdown();
        assert!(executor.pool().is_shutdown());
        assert!(executor.is_shutdown());
        assert_eq!(executor.backlog(), 0);
        assert_eq!(executor.stats().rejected, 2);
        for handle in waiting {
            assert!(matches!(handle.join(), Err(ExecutorError::TaskDropped)));
        }

        // Late submissions are dropped
        executor.execute(|| panic!("must not run"));
        assert_eq!(executor.stats().dropped, 1);
        assert_eq!(executor.backlog(), 0);

        // Work already in the pool still runs
        assert!(!executor.is_terminated());
        executor.pool().finish_all();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(executor.is_terminated());
        assert!(executor.await_termination(Duration::from_millis(1)));
    }

    #[test]
    fn test_refused_task_dropped_outside_lock() {
        let executor = executor(config(1));
        executor.pool().reject.store(true, Ordering::SeqCst);

        // Dropping the refused closure submits again
        let guard = ResubmitOnDrop(Some(executor.clone()));
        executor.execute(move || {
            let _keep = &guard;
        });

        assert_eq!(executor.stats().rejected, 2);
        assert_eq!(executor.backlog(), 0);
    }

    #[test]
    fn test_shutdown_with_empty_backlog_is_immediate() {
        let executor = executor(config(2));
        ExecutorService::shutdown(&executor);
        assert!(executor.pool().is_shutdown());
        assert!(ExecutorService::is_terminated(&executor));
    }

    #[test]
    fn test_shutdown_now_returns_backlog_in_order() {
        let executor = executor(config(1));
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = order.clone();
            executor.execute(move || order.lock().push(i));
        }

        let pending = executor.shutdown_now();
        assert_eq!(pending.len(), 3);
        assert_eq!(executor.backlog(), 0);
        assert!(executor.pool().is_shutdown());

        for mut job in pending {
            job.run();
            job.complete();
        }
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_dropping_executor_drops_backlog() {
        let executor = executor(config(1));
        let _first = executor.submit(|| 1).unwrap();
        let second = executor.submit(|| 2).unwrap();

        drop(executor);
        assert!(matches!(second.join(), Err(ExecutorError::TaskDropped)));
    }

    #[test]
    fn test_diagnostics_disabled() {
        let executor = executor(config(2));
        executor.execute(|| {});
        assert!(executor.diagnostics().is_none());
        assert_eq!(executor.stats().in_flight, None);
    }

    #[test]
    fn test_diagnostics_track_admitted_tasks() {
        let executor = executor(config(2).with_debug(true));
        for _ in 0..3 {
            executor.execute(|| {});
        }

        let flight = executor.diagnostics().unwrap();
        assert_eq!(flight.len(), 2);
        assert_eq!(flight.scans(), 3);
        assert_eq!(flight.threshold(), Duration::from_secs(30));

        executor.pool().finish_one();
        assert_eq!(flight.len(), 2);
        executor.pool().finish_all();
        assert!(flight.is_empty());
    }

    #[test]
    fn test_stale_task_reported_on_submission() {
        let sink = Arc::new(Collect::default());
        let executor = BufferExecutor::builder(config(1).with_debug(true))
            .stale_sink(sink.clone())
            .build_with_pool(ManualPool::new(1))
            .unwrap();

        executor.execute(|| {});
        let flight = executor.diagnostics().unwrap();
        let ids = flight.task_ids();
        assert_eq!(ids.len(), 1);
        flight.backdate(ids[0], Duration::from_secs(31));

        // Each submission scans once and reports the stuck task again
        executor.execute(|| {});
        executor.execute(|| {});
        {
            let reports = sink.0.lock();
            assert_eq!(reports.len(), 2);
            assert!(reports.iter().all(|r| r.id == ids[0]));
            assert!(!reports[0].trace.is_empty());
        }

        executor.pool().finish_all();
        executor.execute(|| {});
        assert_eq!(sink.0.lock().len(), 2);
        assert_eq!(flight.reported(), 2);
    }

    #[test]
    fn test_stats_track_peak_backlog() {
        let executor = executor(config(1));
        for _ in 0..5 {
            executor.execute(|| {});
        }
        executor.pool().finish_all();

        let stats = executor.stats();
        assert_eq!(stats.peak_backlog, 4);
        assert_eq!(stats.backlog, 0);
        assert_eq!(stats.admitted, 5);
    }
}
