//! Real-time OEE monitoring for one production line.
//!
//! Readings from a signal source are classified into production, setup and
//! downtime, accumulated per session, and appended to a CSV log that can be
//! replayed into the same totals later.

pub mod cli;
mod commands;
pub mod db;
pub mod engine;
pub mod journal;
pub mod models;
pub mod monitor;
pub mod report;
pub mod settings;
pub mod source;
pub mod utils;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use cli::Cli;

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    utils::logging::init(level);

    log::info!("factory-sight {} starting up", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("factory-sight")
        .build()
        .context("failed to start the async runtime")?;

    let result = runtime.block_on(commands::dispatch(cli));
    // A stdin read left pending by a timed-out prompt would otherwise hold
    // shutdown open.
    runtime.shutdown_timeout(Duration::from_millis(250));
    result
}
