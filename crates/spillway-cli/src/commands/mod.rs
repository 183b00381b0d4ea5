//! Subcommand implementations

pub mod burst;
pub mod config;
