//! Command-line interface for the reprise engine.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reprise_ir::DEFAULT_METHOD;

#[derive(Parser)]
#[command(name = "reprise")]
#[command(about = "Resumable procedures over an abstract instruction format", long_about = None)]
pub struct Cli {
    /// Log analysis and runtime decisions at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the descriptor and the original and instrumented listings
    Inspect {
        class: PathBuf,
        #[arg(long, default_value = DEFAULT_METHOD)]
        method: String,
    },
    /// Write the instrumented class
    Instrument {
        class: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value = DEFAULT_METHOD)]
        method: String,
    },
    /// Load classes and run commands read from stdin
    Session {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Idle time after which a continuation expires, overriding the config
        #[arg(long)]
        expiration_secs: Option<u64>,
        /// Maximum number of registered continuations, overriding the config
        #[arg(long)]
        max_entries: Option<usize>,
        /// Sweep expired continuations on a background thread
        #[arg(long)]
        background_sweep: bool,
        #[arg(required = true)]
        classes: Vec<PathBuf>,
    },
}
