//! Process-wide executor
//!
//! The first call to [`executor`] or [`execute`] builds a [`BufferExecutor`]
//! from the configuration passed to [`configure`], or from the `SPILLWAY_*`
//! environment when nothing was configured.

use crate::config::ExecutorConfig;
use crate::executor::Executor;
use crate::scheduler::BufferExecutor;
use crate::{ExecutorError, ExecutorResult, ThreadPool};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, warn};

static CONFIG: OnceCell<ExecutorConfig> = OnceCell::new();

static EXECUTOR: Lazy<RwLock<Option<Arc<dyn Executor>>>> = Lazy::new(|| RwLock::new(None));

/// Set the configuration of the process executor
///
/// Fails with [`ExecutorError::AlreadyInitialized`] once the configuration
/// was set or the process executor was first used.
pub fn configure(config: ExecutorConfig) -> ExecutorResult<()> {
    config.validate()?;
    CONFIG
        .set(config)
        .map_err(|_| ExecutorError::AlreadyInitialized)
}

/// Configuration of the process executor, fixed on first use
pub fn config() -> &'static ExecutorConfig {
    CONFIG.get_or_init(|| {
        ExecutorConfig::from_env().unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring SPILLWAY_* environment, using defaults");
            ExecutorConfig::default()
        })
    })
}

/// The process executor, built on first use
pub fn executor() -> Arc<dyn Executor> {
    if let Some(executor) = EXECUTOR.read().as_ref() {
        return Arc::clone(executor);
    }

    let mut slot = EXECUTOR.write();
    if let Some(executor) = slot.as_ref() {
        return Arc::clone(executor);
    }

    let config = config();
    let executor: Arc<dyn Executor> = match BufferExecutor::new(config.clone()) {
        Ok(executor) => Arc::new(executor),
        Err(e) => {
            error!(error = %e, "Cannot build process executor, falling back to a plain pool");
            Arc::new(ThreadPool::from_config(&ExecutorConfig::default()))
        }
    };
    *slot = Some(Arc::clone(&executor));
    executor
}

/// Replace the process executor
pub fn set_executor(executor: Arc<dyn Executor>) {
    *EXECUTOR.write() = Some(executor);
}

/// Run `f` on the process executor
pub fn execute<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Err(e) = executor().execute(Box::new(f)) {
        debug!(error = %e, "Process executor rejected task");
    }
}
