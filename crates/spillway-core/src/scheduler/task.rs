//! Task structure handed from the backlog to the pool

use crate::executor::Work;
use crate::pool::Job;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

type Completion = Box<dyn FnOnce(TaskId) + Send + 'static>;

/// Submitted work plus its completion callback
///
/// The work runs at most once; the completion callback runs exactly once
/// when the pool completes the job, whether the work returned or panicked.
pub struct Task {
    id: TaskId,
    work: Option<Work>,
    trace: String,
    on_complete: Option<Completion>,
}

impl Task {
    /// Create a new Task
    pub(crate) fn new<C>(work: Work, trace: String, on_complete: C) -> Self
    where
        C: FnOnce(TaskId) + Send + 'static,
    {
        Self {
            id: TaskId::new(),
            work: Some(work),
            trace,
            on_complete: Some(Box::new(on_complete)),
        }
    }

    /// Get the Task's unique ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Submission stack trace; empty unless diagnostics are enabled
    pub fn trace(&self) -> &str {
        &self.trace
    }

    /// Move the captured trace out (it is kept by the diagnostics registry)
    pub(crate) fn take_trace(&mut self) -> String {
        std::mem::take(&mut self.trace)
    }
}

impl Job for Task {
    fn run(&mut self) {
        if let Some(work) = self.work.take() {
            work();
        }
    }

    fn complete(mut self: Box<Self>) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(self.id);
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("pending", &self.work.is_some())
            .finish()
    }
}
