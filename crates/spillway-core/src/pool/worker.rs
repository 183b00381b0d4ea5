//! Worker thread that executes pool jobs

use super::thread_pool::{PoolInner, RunState};
use super::Job;
use crossbeam::channel::RecvTimeoutError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use tracing::{error, trace};

/// Worker thread main loop
///
/// `first` was already counted as active by the spawning thread.
pub(super) fn run(pool: Arc<PoolInner>, first: Option<Box<dyn Job>>) {
    let mut next = first;

    loop {
        let job = match next.take() {
            Some(job) => job,
            None => match next_job(&pool) {
                Some(job) => job,
                None => break,
            },
        };

        execute_job(&pool, job);
    }

    trace!(thread = ?thread::current().name(), "Pool worker exiting");
}

/// Wait for the next queued job, or retire
///
/// Returns `None` once this worker has been removed from the worker count.
fn next_job(pool: &Arc<PoolInner>) -> Option<Box<dyn Job>> {
    loop {
        {
            let mut state = pool.state.lock();
            if state.run_state >= RunState::Stop {
                pool.retire(&mut state);
                return None;
            }
        }

        match pool.receiver.recv_timeout(pool.keep_alive) {
            Ok(job) => {
                pool.active.fetch_add(1, Ordering::AcqRel);
                return Some(job);
            }
            Err(RecvTimeoutError::Disconnected) => {
                // Shut down and drained
                pool.retire(&mut pool.state.lock());
                return None;
            }
            Err(RecvTimeoutError::Timeout) => {
                let mut state = pool.state.lock();
                let may_time_out = pool.allow_core_timeout.load(Ordering::Acquire)
                    || state.workers > state.core_size;
                // The last worker stays while work is queued
                if may_time_out && (state.workers > 1 || pool.receiver.is_empty()) {
                    pool.retire(&mut state);
                    return None;
                }
            }
        }
    }
}

/// Run one job, release the active slot, then let the job complete
fn execute_job(pool: &PoolInner, mut job: Box<dyn Job>) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run()));

    pool.active.fetch_sub(1, Ordering::AcqRel);
    pool.completed.fetch_add(1, Ordering::AcqRel);

    if let Err(payload) = outcome {
        error!(
            thread = ?thread::current().name(),
            panic = %panic_message(payload.as_ref()),
            "Pool job panicked"
        );
    }

    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || job.complete())) {
        error!(
            thread = ?thread::current().name(),
            panic = %panic_message(payload.as_ref()),
            "Pool job completion panicked"
        );
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
