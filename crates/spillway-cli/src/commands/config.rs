//! `spillway config`: show the effective executor configuration.

use spillway_core::ExecutorConfig;

pub fn execute() -> anyhow::Result<()> {
    let config = ExecutorConfig::from_env()?;

    println!("Spillway v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Core size:          {}", config.core_size);
    println!(
        "Bigger core size:   {} (backlog > {})",
        config.bigger_core_size,
        config.max_primary_queue_size.saturating_mul(10)
    );
    println!(
        "Max core size:      {} (backlog > {})",
        config.max_core_size,
        config.max_primary_queue_size.saturating_mul(100)
    );
    println!("Ready queue bound:  {}", config.max_primary_queue_size);
    println!("Keep-alive:         {:?}", config.keep_alive);
    println!("Thread name:        {}", config.thread_name);
    println!("Diagnostics:        {}", if config.debug { "on" } else { "off" });

    println!();
    println!("Environment:");
    for name in [
        "SPILLWAY_CORE_SIZE",
        "SPILLWAY_BIGGER_CORE_SIZE",
        "SPILLWAY_MAX_CORE_SIZE",
        "SPILLWAY_MAX_QUEUE_SIZE",
        "SPILLWAY_KEEP_ALIVE_SECS",
        "SPILLWAY_THREAD_NAME",
        "SPILLWAY_DEBUG",
    ] {
        match std::env::var(name) {
            Ok(value) => println!("  {:<26} {}", name, value),
            Err(_) => println!("  {:<26} (not set)", name),
        }
    }

    Ok(())
}
