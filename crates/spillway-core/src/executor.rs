//! Executor contracts
//!
//! [`Executor`] is the fire-and-forget entry point, [`ExecutorService`] adds
//! lifecycle control, and [`ExecutorExt`] layers result-bearing submission on
//! top of any executor.

use crate::pool::{self, panic_message, Job, ThreadPool, WorkerPool};
use crate::{ExecutorError, ExecutorResult};
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

/// Caller-supplied unit of work
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs work, eventually, on some thread
pub trait Executor: Send + Sync {
    /// Submit work for execution
    fn execute(&self, work: Work) -> ExecutorResult<()>;
}

/// Executor with lifecycle control
pub trait ExecutorService: Executor {
    /// Stop accepting work; work already handed to workers still runs
    fn shutdown(&self);

    /// Stop accepting work and return the accepted work that has not started
    fn shutdown_now(&self) -> Vec<Box<dyn Job>>;

    /// Whether shutdown was requested
    fn is_shutdown(&self) -> bool;

    /// Whether shutdown finished and no work is left
    fn is_terminated(&self) -> bool;

    /// Block until terminated or `timeout` elapses; returns `is_terminated()`
    fn await_termination(&self, timeout: Duration) -> bool;
}

/// Handle for awaiting a submitted closure's result
pub struct TaskHandle<T> {
    receiver: Receiver<thread::Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the result is available
    pub fn join(self) -> ExecutorResult<T> {
        match self.receiver.recv() {
            Ok(outcome) => unpack(outcome),
            Err(_) => Err(ExecutorError::TaskDropped),
        }
    }

    /// Block for at most `timeout`; the handle stays usable after a timeout
    pub fn join_timeout(&self, timeout: Duration) -> ExecutorResult<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => unpack(outcome),
            Err(RecvTimeoutError::Timeout) => Err(ExecutorError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(ExecutorError::TaskDropped),
        }
    }

    /// Whether the result is ready to be joined without blocking
    pub fn is_finished(&self) -> bool {
        !self.receiver.is_empty()
    }
}

fn unpack<T>(outcome: thread::Result<T>) -> ExecutorResult<T> {
    outcome.map_err(|payload| ExecutorError::TaskPanicked(panic_message(payload.as_ref())))
}

/// Result-bearing submission for every [`Executor`]
pub trait ExecutorExt: Executor {
    /// Submit a closure and get a handle to its result
    fn submit<F, T>(&self, f: F) -> ExecutorResult<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        self.execute(Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
            let _ = tx.send(outcome);
        }))?;
        Ok(TaskHandle { receiver: rx })
    }

    /// Submit every closure and wait for all of them, in submission order
    fn invoke_all<I, F, T>(&self, tasks: I) -> Vec<ExecutorResult<T>>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = tasks.into_iter().map(|f| self.submit(f)).collect();
        handles
            .into_iter()
            .map(|handle| handle.and_then(TaskHandle::join))
            .collect()
    }

    /// Submit every closure and return the first result that did not panic
    fn invoke_any<I, F, T>(&self, tasks: I) -> ExecutorResult<T>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = channel::unbounded::<thread::Result<T>>();
        let mut submitted = 0usize;
        let mut last_error = None;

        for f in tasks {
            let tx = tx.clone();
            let accepted = self.execute(Box::new(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(f));
                let _ = tx.send(outcome);
            }));
            match accepted {
                Ok(()) => submitted += 1,
                Err(e) => last_error = Some(e),
            }
        }
        drop(tx);

        if submitted == 0 {
            return Err(last_error.unwrap_or_else(|| {
                ExecutorError::Rejected("invoke_any called without tasks".to_string())
            }));
        }

        for outcome in rx.iter() {
            match unpack(outcome) {
                Ok(value) => return Ok(value),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or(ExecutorError::TaskDropped))
    }
}

impl<E: Executor + ?Sized> ExecutorExt for E {}

impl Executor for ThreadPool {
    fn execute(&self, work: Work) -> ExecutorResult<()> {
        WorkerPool::execute(self, pool::job(work))?;
        Ok(())
    }
}

impl ExecutorService for ThreadPool {
    fn shutdown(&self) {
        WorkerPool::shutdown(self)
    }

    fn shutdown_now(&self) -> Vec<Box<dyn Job>> {
        WorkerPool::shutdown_now(self)
    }

    fn is_shutdown(&self) -> bool {
        WorkerPool::is_shutdown(self)
    }

    fn is_terminated(&self) -> bool {
        WorkerPool::is_terminated(self)
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        WorkerPool::await_termination(self, timeout)
    }
}
