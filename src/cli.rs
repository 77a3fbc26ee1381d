use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::settings::DEFAULT_CONFIG_FILE;

#[derive(Parser, Debug)]
#[command(name = "factory-sight")]
#[command(version)]
#[command(about = "Real-time OEE monitoring for a single production line")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Settings file; missing files fall back to defaults
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Monitor the line until Ctrl-C or the end of the feed, then close the session
    Monitor(MonitorArgs),

    /// Final report for a session log
    Report {
        /// Path to an OEE_Log_*.csv file
        log: PathBuf,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        line: LineArgs,
    },

    /// List recorded sessions
    History {
        /// Directory holding the session logs
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Maximum number of sessions to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Write the effective settings to the settings file
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Where readings come from. Without any of these the line is simulated.
#[derive(Args, Debug, Default)]
#[group(multiple = false)]
pub struct SourceArgs {
    /// Read newline-delimited signal codes from a device node
    #[arg(long)]
    pub device: Option<PathBuf>,

    /// Read signal codes from standard input
    #[arg(long)]
    pub stdin: bool,

    /// Replay a `<offset_secs> <CODE>` script
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Use the built-in simulation
    #[arg(long)]
    pub simulate: bool,
}

/// Line parameters that override the settings file.
#[derive(Args, Debug, Default)]
pub struct LineArgs {
    /// Units the shift is expected to produce
    #[arg(long)]
    pub target_steps: Option<u64>,

    /// Ideal seconds per unit
    #[arg(long)]
    pub ideal_cycle_time: Option<f64>,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub line: LineArgs,

    /// Close with this many defective units instead of asking
    #[arg(long)]
    pub defects: Option<i64>,

    /// Directory for session logs
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Also write a snapshot row every N seconds
    #[arg(long)]
    pub checkpoint_secs: Option<u64>,

    /// Seed for the simulation
    #[arg(long)]
    pub seed: Option<u64>,
}
