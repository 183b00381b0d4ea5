//! Executor configuration
//!
//! Pool sizes are derived from the number of hardware threads. Every knob can
//! be overridden in code through the `with_*` setters or from the environment
//! through [`ExecutorConfig::from_env`].

use crate::{ExecutorError, ExecutorResult};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default idle keep-alive of pool threads
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Default bound of the pool's ready queue
pub const DEFAULT_MAX_PRIMARY_QUEUE_SIZE: usize = 10;

/// Default worker thread name prefix
pub const DEFAULT_THREAD_NAME: &str = "spillway-worker";

/// Configuration of a [`BufferExecutor`](crate::BufferExecutor)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Steady-state core concurrency
    pub core_size: usize,

    /// Core concurrency while the backlog is large
    pub bigger_core_size: usize,

    /// Core concurrency while the backlog is very large
    pub max_core_size: usize,

    /// Capacity of the pool's ready queue; also scales the tuning bands
    pub max_primary_queue_size: usize,

    /// Idle keep-alive of pool threads, and the stale-task threshold
    pub keep_alive: Duration,

    /// Worker thread name prefix
    pub thread_name: String,

    /// Track in-flight tasks and report stuck ones
    pub debug: bool,
}

impl ExecutorConfig {
    /// Derive pool sizes for `parallelism` hardware threads
    pub fn for_parallelism(parallelism: usize) -> Self {
        let parallelism = parallelism.max(1);
        Self {
            core_size: (parallelism - 1).clamp(3, 6),
            bigger_core_size: parallelism * 4,
            max_core_size: parallelism * 8,
            max_primary_queue_size: DEFAULT_MAX_PRIMARY_QUEUE_SIZE,
            keep_alive: DEFAULT_KEEP_ALIVE,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            debug: false,
        }
    }

    /// Defaults overridden by `SPILLWAY_*` environment variables
    pub fn from_env() -> ExecutorResult<Self> {
        let mut config = Self::default();

        if let Some(v) = parse_var("SPILLWAY_CORE_SIZE")? {
            config.core_size = v;
        }
        if let Some(v) = parse_var("SPILLWAY_BIGGER_CORE_SIZE")? {
            config.bigger_core_size = v;
        }
        if let Some(v) = parse_var("SPILLWAY_MAX_CORE_SIZE")? {
            config.max_core_size = v;
        }
        if let Some(v) = parse_var("SPILLWAY_MAX_QUEUE_SIZE")? {
            config.max_primary_queue_size = v;
        }
        if let Some(secs) = parse_var::<u64>("SPILLWAY_KEEP_ALIVE_SECS")? {
            config.keep_alive = Duration::from_secs(secs);
        }
        if let Ok(name) = env::var("SPILLWAY_THREAD_NAME") {
            config.thread_name = name;
        }
        if let Ok(flag) = env::var("SPILLWAY_DEBUG") {
            config.debug = parse_flag("SPILLWAY_DEBUG", &flag)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check size ordering and bounds
    pub fn validate(&self) -> ExecutorResult<()> {
        if self.core_size == 0 {
            return Err(ExecutorError::InvalidConfig(
                "core_size must be at least 1".to_string(),
            ));
        }
        if self.core_size > self.bigger_core_size || self.bigger_core_size > self.max_core_size {
            return Err(ExecutorError::InvalidConfig(format!(
                "expected core_size <= bigger_core_size <= max_core_size, got {} / {} / {}",
                self.core_size, self.bigger_core_size, self.max_core_size
            )));
        }
        if self.max_primary_queue_size == 0 {
            return Err(ExecutorError::InvalidConfig(
                "max_primary_queue_size must be at least 1".to_string(),
            ));
        }
        if self.thread_name.is_empty() {
            return Err(ExecutorError::InvalidConfig(
                "thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the steady-state core size
    pub fn with_core_size(mut self, size: usize) -> Self {
        self.core_size = size;
        self
    }

    /// Set the core size used for large backlogs
    pub fn with_bigger_core_size(mut self, size: usize) -> Self {
        self.bigger_core_size = size;
        self
    }

    /// Set the core size used for very large backlogs
    pub fn with_max_core_size(mut self, size: usize) -> Self {
        self.max_core_size = size;
        self
    }

    /// Set the ready queue bound
    pub fn with_max_primary_queue_size(mut self, size: usize) -> Self {
        self.max_primary_queue_size = size;
        self
    }

    /// Set the idle keep-alive
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the worker thread name prefix
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Enable or disable in-flight diagnostics
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::for_parallelism(num_cpus::get())
    }
}

fn parse_var<T: FromStr>(name: &str) -> ExecutorResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ExecutorError::InvalidConfig(format!("{}: cannot parse {:?}", name, raw))),
        Err(_) => Ok(None),
    }
}

fn parse_flag(name: &str, raw: &str) -> ExecutorResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ExecutorError::InvalidConfig(format!(
            "{}: expected a boolean, got {:?}",
            name, raw
        ))),
    }
}
