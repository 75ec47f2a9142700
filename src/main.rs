mod cli;
mod clock;
mod config;
mod error;
mod load;
mod logging;
mod probe;
mod runner;
mod shared;

use std::path::Path;
use std::process;

use clap::Parser;

use cli::{Cli, Command, LoadArgs};
use config::SyncloadConfig;
use error::Error;

/// Build a SyncloadConfig by layering: defaults → TOML file → CLI overrides,
/// then validate the result.
fn build_syncload_config(
    config_file: Option<&Path>,
    load_args: &LoadArgs,
) -> Result<SyncloadConfig, Error> {
    let mut cfg = match config::load_config(config_file) {
        Ok(c) => c.syncload,
        Err(e) => {
            log::warn!("{}", e);
            SyncloadConfig::default()
        }
    };

    // Apply CLI overrides (only if explicitly set)
    if let Some(v) = load_args.workers {
        cfg.workers = v;
    }
    if let Some(v) = load_args.max_ops {
        cfg.max_ops = v;
    }
    if let Some(v) = load_args.busy_ms {
        cfg.busy_ms = v;
    }
    if let Some(v) = load_args.sleep_ms {
        cfg.sleep_ms = v;
    }

    cfg.validate()?;
    Ok(cfg)
}

fn run_load(cli: &Cli) {
    let timeout = match runner::parse_duration(&cli.timeout) {
        Ok(d) => d,
        Err(e) => {
            log::error!("{}", e);
            process::exit(1);
        }
    };
    let result = build_syncload_config(cli.config_file.as_deref(), &cli.load)
        .and_then(|cfg| runner::run(&cfg, timeout));

    if let Err(e) = result {
        log::error!("{}", e);
        process::exit(1);
    }
}

fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Some(Command::Probe(args)) => {
            logging::init(&args.log, false);
            if let Err(e) = probe::run(args) {
                log::error!("{}", e);
                process::exit(1);
            }
        }
        None => {
            logging::init(&cli.log, true);
            run_load(&cli);
        }
    }
}
