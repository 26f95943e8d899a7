//! reprise CLI entry point.

mod cli;

use std::io;

use clap::Parser;
use cli::{Cli, Command};
use reprise::config::EngineConfig;
use reprise::pipeline::{inspect, instrument, load_all, read_bytes};
use reprise::session::Session;
use tracing_subscriber::{EnvFilter, fmt};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli.command) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Log to stderr, filtered by `RUST_LOG` when set.
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run(command: Command) -> reprise::Result<()> {
    match command {
        Command::Inspect { class, method } => {
            print!("{}", inspect(&read_bytes(&class)?, &method)?);
        }
        Command::Instrument {
            class,
            output,
            method,
        } => {
            instrument(&class, &output, &method)?;
        }
        Command::Session {
            config,
            expiration_secs,
            max_entries,
            background_sweep,
            classes,
        } => {
            let mut settings = match config {
                Some(path) => EngineConfig::from_file(&path)?,
                None => EngineConfig::default(),
            };
            if let Some(secs) = expiration_secs {
                settings.continuations.expiration_secs = secs;
            }
            if max_entries.is_some() {
                settings.continuations.max_entries = max_entries;
            }
            settings.continuations.background_sweep |= background_sweep;

            let engine = settings.build_engine()?;
            for class in load_all(&engine, &classes)? {
                eprintln!("loaded {class}");
            }
            Session::new(&engine).run(io::stdin().lock(), io::stdout().lock())?;
        }
    }
    Ok(())
}
