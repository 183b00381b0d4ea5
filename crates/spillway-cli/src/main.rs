//! Spillway command-line tool
//!
//! Drives bursts of synthetic load through a buffering executor and shows
//! the configuration the executor would run with.

mod commands;

use clap::{Parser, Subcommand};
use commands::burst::BurstOptions;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spillway")]
#[command(about = "Two-tier buffering executor toolkit", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push a burst of sleeping tasks through the executor
    Burst {
        /// Number of tasks to submit
        #[arg(short, long, default_value_t = 1000)]
        tasks: usize,
        /// How long each task sleeps, in milliseconds
        #[arg(long, default_value_t = 10)]
        task_ms: u64,
        /// Steady-state core size
        #[arg(long)]
        core_size: Option<usize>,
        /// Bound of the pool's ready queue
        #[arg(long)]
        max_queue_size: Option<usize>,
        /// Idle keep-alive of pool threads, in seconds
        #[arg(long)]
        keep_alive_secs: Option<u64>,
        /// Track in-flight tasks and report stuck ones
        #[arg(long)]
        debug: bool,
        /// Interval between progress samples, in milliseconds
        #[arg(long, default_value_t = 100)]
        sample_ms: u64,
    },

    /// Print the effective executor configuration
    Config,
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_names(true)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Burst {
            tasks,
            task_ms,
            core_size,
            max_queue_size,
            keep_alive_secs,
            debug,
            sample_ms,
        } => commands::burst::execute(BurstOptions {
            tasks,
            task_ms,
            core_size,
            max_queue_size,
            keep_alive_secs,
            debug,
            sample_ms,
        }),

        Commands::Config => commands::config::execute(),
    }
}
