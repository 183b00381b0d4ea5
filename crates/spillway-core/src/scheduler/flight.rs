//! In-flight task diagnostics
//!
//! Only built when the executor runs with `debug` enabled. Every task handed
//! to the pool is recorded with the stack trace captured at submission and
//! its admission time; each new submission scans the records and reports
//! tasks that have been in flight longer than the pool keep-alive. Reports
//! are advisory: nothing is cancelled or evicted.

use crate::scheduler::TaskId;
use dashmap::DashMap;
use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Record of a task currently in the pool
#[derive(Debug, Clone)]
pub struct FlightTaskInfo {
    /// Stack trace captured at submission
    pub trace: String,

    /// Wall-clock admission time
    pub admitted_at: SystemTime,

    admitted: Instant,
}

/// A task in flight for longer than the threshold
#[derive(Debug, Clone)]
pub struct StaleTask {
    /// Task identity
    pub id: TaskId,

    /// Stack trace captured at submission
    pub trace: String,

    /// Wall-clock admission time
    pub admitted_at: SystemTime,

    /// Wall-clock time of the scan
    pub now: SystemTime,

    /// Time spent in flight
    pub age: Duration,
}

/// Receiver of stale task reports
pub trait StaleTaskSink: Send + Sync {
    /// Called once per stale task per scan
    fn report(&self, stale: &StaleTask);
}

/// Reports stale tasks as `tracing` warnings
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl StaleTaskSink for LogSink {
    fn report(&self, stale: &StaleTask) {
        warn!(
            task = %stale.id,
            admitted_at_ms = epoch_millis(stale.admitted_at),
            now_ms = epoch_millis(stale.now),
            age_ms = saturating_millis(stale.age),
            "Task has been running longer than the pool keep-alive; it is slow itself \
             or the pool is saturated by slow tasks. Submitted from:\n{}",
            stale.trace
        );
    }
}

/// Milliseconds since the UNIX epoch
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(saturating_millis)
        .unwrap_or(0)
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Registry of tasks admitted to the pool and not yet completed
pub struct FlightRecorder {
    entries: DashMap<TaskId, FlightTaskInfo>,
    threshold: Duration,
    sink: Arc<dyn StaleTaskSink>,
    scans: AtomicU64,
    reported: AtomicU64,
}

impl FlightRecorder {
    /// Create a recorder reporting tasks older than `threshold` to `sink`
    pub fn new(threshold: Duration, sink: Arc<dyn StaleTaskSink>) -> Self {
        Self {
            entries: DashMap::new(),
            threshold,
            sink,
            scans: AtomicU64::new(0),
            reported: AtomicU64::new(0),
        }
    }

    /// Capture the calling thread's stack as text
    pub fn capture_trace() -> String {
        Backtrace::force_capture().to_string()
    }

    /// Record a task handed to the pool
    pub fn admitted(&self, id: TaskId, trace: String) {
        self.entries.insert(
            id,
            FlightTaskInfo {
                trace,
                admitted_at: SystemTime::now(),
                admitted: Instant::now(),
            },
        );
    }

    /// Forget a task; returns whether it was recorded
    pub fn completed(&self, id: TaskId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Report every record older than the threshold; returns how many
    pub fn scan(&self) -> usize {
        self.scans.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let wall = SystemTime::now();
        let mut stale = Vec::new();

        for entry in self.entries.iter() {
            let age = now.saturating_duration_since(entry.admitted);
            if age > self.threshold {
                stale.push(StaleTask {
                    id: *entry.key(),
                    trace: entry.trace.clone(),
                    admitted_at: entry.admitted_at,
                    now: wall,
                    age,
                });
            }
        }

        // Report outside the map shards
        for task in &stale {
            self.sink.report(task);
        }
        self.reported.fetch_add(stale.len() as u64, Ordering::Relaxed);
        stale.len()
    }

    /// Snapshot of one record
    pub fn get(&self, id: TaskId) -> Option<FlightTaskInfo> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    /// Ids of every task in flight, oldest admission first
    pub fn task_ids(&self) -> Vec<TaskId> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.admitted, *entry.key()))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, id)| id).collect()
    }

    /// Whether the task is recorded
    pub fn contains(&self, id: TaskId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of tasks in flight
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no task is in flight
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Staleness threshold
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Scans run so far
    pub fn scans(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Stale reports emitted so far
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, id: TaskId, by: Duration) {
        if let Some(mut entry) = self.entries.get_mut(&id) {
            if let Some(admitted) = entry.admitted.checked_sub(by) {
                entry.admitted = admitted;
            }
            entry.admitted_at -= by;
        }
    }
}

impl std::fmt::Debug for FlightRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightRecorder")
            .field("in_flight", &self.entries.len())
            .field("threshold", &self.threshold)
            .finish()
    }
}
