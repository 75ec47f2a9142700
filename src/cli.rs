use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{self, PHASE_MS_MAX, PHASE_MS_MIN};
use crate::logging::LogArgs;

fn parse_phase_ms(s: &str) -> Result<f64, String> {
    let ms: f64 = s.parse().map_err(|_| format!("`{}` is not a number", s))?;
    if !config::phase_ms_in_range(ms) {
        return Err(format!("{} is not in {}..={}", ms, PHASE_MS_MIN, PHASE_MS_MAX));
    }
    Ok(ms)
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Number of worker processes (0 = one per online CPU)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Stop each worker after N completed busy+sleep cycles (0 = unlimited)
    #[arg(long = "ops")]
    pub max_ops: Option<u64>,

    /// Nominal busy duration in milliseconds (1-10000)
    #[arg(long, value_parser = parse_phase_ms)]
    pub busy_ms: Option<f64>,

    /// Nominal sleep duration in milliseconds (1-10000)
    #[arg(long, value_parser = parse_phase_ms)]
    pub sleep_ms: Option<f64>,
}

#[derive(Debug, Parser)]
#[command(
    name = "syncload",
    about = "Synchronized CPU load spikes across worker processes"
)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Run duration (e.g. 30s, 5m, 1h, 2d; bare number = seconds)
    #[arg(short = 't', long, default_value = "60s")]
    pub timeout: String,

    /// Configuration file path (default: /etc/syncload.toml)
    #[arg(long = "config")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub load: LoadArgs,

    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Report the synchronization tier, spin primitives and their cost
    Probe(ProbeArgs),
}

#[derive(Debug, Parser)]
pub struct ProbeArgs {
    /// Invocations timed per spin primitive
    #[arg(short = 'n', long, default_value_t = 10_000, value_parser = clap::value_parser!(u32).range(1..=10_000_000))]
    pub samples: u32,

    #[command(flatten)]
    pub log: LogArgs,
}
