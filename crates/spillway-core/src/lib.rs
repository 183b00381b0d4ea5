//! Spillway Core Runtime
//!
//! This crate provides a two-tier buffering executor:
//! - Bounded worker pool with a small ready queue and adjustable core size
//! - Unbounded secondary backlog feeding the pool in FIFO order
//! - Backlog-driven core concurrency tuning
//! - Debug-only in-flight diagnostics for stuck tasks

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod executor;
pub mod global;
pub mod main_thread;
pub mod pool;
pub mod scheduler;

pub use config::ExecutorConfig;
pub use executor::{Executor, ExecutorExt, ExecutorService, TaskHandle, Work};
pub use main_thread::{MainHandle, MainLooper};
pub use pool::{Job, PoolStats, RejectedJob, ThreadPool, WorkerPool};
pub use scheduler::{
    BufferExecutor, BufferExecutorBuilder, BufferStats, FlightRecorder, LogSink, StaleTask,
    StaleTaskSink, TaskId,
};

/// Executor errors
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The worker pool refused the job
    #[error("Rejected: {0}")]
    Rejected(String),

    /// A worker thread could not be started
    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    /// The task panicked while running
    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    /// The task was discarded before it produced a result
    #[error("Task was dropped before completion")]
    TaskDropped,

    /// Waiting for a result timed out
    #[error("Timed out")]
    Timeout,

    /// The process-wide executor was already created
    #[error("Process executor already initialized")]
    AlreadyInitialized,
}

/// Executor result
pub type ExecutorResult<T> = Result<T, ExecutorError>;
