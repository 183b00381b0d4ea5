//! `spillway burst`: push a burst of sleeping tasks through the executor.

use anyhow::{bail, Context};
use crossbeam::channel::{self, RecvTimeoutError};
use spillway_core::{BufferExecutor, ExecutorConfig, WorkerPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

pub struct BurstOptions {
    pub tasks: usize,
    pub task_ms: u64,
    pub core_size: Option<usize>,
    pub max_queue_size: Option<usize>,
    pub keep_alive_secs: Option<u64>,
    pub debug: bool,
    pub sample_ms: u64,
}

/// Peaks observed by the sampler
#[derive(Default)]
struct Peaks {
    core_size: usize,
    workers: usize,
    samples: usize,
}

fn build_config(options: &BurstOptions) -> anyhow::Result<ExecutorConfig> {
    let mut config = ExecutorConfig::from_env()?;

    if let Some(core) = options.core_size {
        config.core_size = core;
        config.bigger_core_size = config.bigger_core_size.max(core);
        config.max_core_size = config.max_core_size.max(config.bigger_core_size);
    }
    if let Some(bound) = options.max_queue_size {
        config.max_primary_queue_size = bound;
    }
    if let Some(secs) = options.keep_alive_secs {
        config.keep_alive = Duration::from_secs(secs);
    }
    if options.debug {
        config.debug = true;
    }

    config.validate()?;
    Ok(config)
}

pub fn execute(options: BurstOptions) -> anyhow::Result<()> {
    let config = build_config(&options)?;
    let executor = BufferExecutor::new(config).context("building executor")?;
    let task_time = Duration::from_millis(options.task_ms);
    let sample_every = Duration::from_millis(options.sample_ms.max(1));

    info!(
        tasks = options.tasks,
        task_ms = options.task_ms,
        core_size = executor.config().core_size,
        bigger_core_size = executor.config().bigger_core_size,
        max_core_size = executor.config().max_core_size,
        "Starting burst"
    );

    let (stop_tx, stop_rx) = channel::bounded::<()>(0);
    let sampler = {
        let executor = executor.clone();
        thread::Builder::new()
            .name("spillway-sampler".to_string())
            .spawn(move || {
                let mut peaks = Peaks::default();
                loop {
                    let stats = executor.stats();
                    peaks.core_size = peaks.core_size.max(stats.pool.core_size);
                    peaks.workers = peaks.workers.max(stats.pool.workers);
                    peaks.samples += 1;
                    info!(
                        backlog = stats.backlog,
                        active = stats.pool.active,
                        queued = stats.pool.queued,
                        core_size = stats.pool.core_size,
                        workers = stats.pool.workers,
                        completed = stats.pool.completed,
                        "Sample"
                    );

                    match stop_rx.recv_timeout(sample_every) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
                peaks
            })
            .context("starting sampler thread")?
    };

    let completed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    for _ in 0..options.tasks {
        let completed = Arc::clone(&completed);
        executor.execute(move || {
            thread::sleep(task_time);
            completed.fetch_add(1, Ordering::Relaxed);
        });
    }
    let submitted_in = start.elapsed();
    let core_after_submit = executor.pool().core_size();

    // Generous bound: every task run one after another, plus slack
    let budget = task_time
        .saturating_mul(options.tasks.try_into().unwrap_or(u32::MAX))
        .saturating_add(Duration::from_secs(60));
    let deadline = start + budget;

    // Shutdown refuses whatever is still in the backlog
    while executor.backlog() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    executor.shutdown();
    let terminated = executor.await_termination(deadline.saturating_duration_since(Instant::now()));
    let elapsed = start.elapsed();

    drop(stop_tx);
    let peaks = sampler
        .join()
        .map_err(|_| anyhow::anyhow!("sampler thread panicked"))?;

    let stats = executor.stats();
    let done = completed.load(Ordering::Relaxed);

    println!();
    println!("Burst summary");
    println!("  Tasks completed:      {}/{}", done, options.tasks);
    println!("  Submission time:      {:?}", submitted_in);
    println!("  Elapsed:              {:?}", elapsed);
    println!("  Core after submit:    {}", core_after_submit);
    println!("  Peak core size:       {}", peaks.core_size.max(core_after_submit));
    println!("  Peak workers:         {}", peaks.workers.max(stats.pool.largest_workers));
    println!("  Peak backlog:         {}", stats.peak_backlog);
    println!("  Samples:              {}", peaks.samples);
    if let Some(in_flight) = stats.in_flight {
        println!("  Still in flight:      {}", in_flight);
    }

    if !terminated {
        bail!("executor did not terminate within {:?}", budget);
    }
    if done != options.tasks {
        bail!("{} of {} tasks completed", done, options.tasks);
    }
    Ok(())
}
