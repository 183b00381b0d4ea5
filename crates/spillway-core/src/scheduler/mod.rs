//! Buffering Scheduler
//!
//! An unbounded FIFO backlog in front of a [`WorkerPool`](crate::WorkerPool).
//! Tasks move from the backlog into the pool only while the pool has spare
//! core capacity, and the pool's core size follows the backlog depth.

mod buffer;
mod flight;
mod task;
mod tuning;

pub use buffer::{BufferExecutor, BufferExecutorBuilder, BufferStats};
pub use flight::{epoch_millis, FlightRecorder, FlightTaskInfo, LogSink, StaleTask, StaleTaskSink};
pub use task::{Task, TaskId};
pub use tuning::{tuned_core_size, CoreBand};
