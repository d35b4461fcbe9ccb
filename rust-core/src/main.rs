//! CLI: trade log in, anomaly report (JSON) out. Logs go to stderr.
//!
//! Usage:
//!   echo '{"trades":[...], "venues":{...}, "prices":{...}}' | tradescan analyze
//!   tradescan csv --trades trading_log.csv --venues venues.csv --prices prices.csv
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tradescan_core::ingest::{self, AnalysisInput};
use tradescan_core::{AnalysisConfig, AnalysisReport, Pipeline};

/// CLI arguments for tradescan.
#[derive(Parser, Debug)]
#[command(name = "tradescan")]
#[command(about = "Flag anomalous trades in an execution log")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/tradescan.toml")]
    config: PathBuf,

    /// Log level (overrides config file; RUST_LOG takes precedence)
    #[arg(long)]
    log_level: Option<String>,

    /// Run detectors on the current thread
    #[arg(long)]
    sequential: bool,

    /// Pretty-print the JSON report
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a JSON document with trades and reference tables from stdin
    Analyze,
    /// Read the trade log and reference tables from CSV files
    Csv {
        #[arg(long)]
        trades: PathBuf,
        #[arg(long)]
        venues: Option<PathBuf>,
        #[arg(long)]
        prices: Option<PathBuf>,
    },
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_missing = !args.config.exists();
    let mut config = if config_missing {
        AnalysisConfig::default()
    } else {
        AnalysisConfig::from_file(&args.config)?
    };
    config.apply_overrides(args.sequential, args.log_level);
    config.validate()?;

    init_logging(&config.log_level)?;
    if config_missing {
        warn!("Config file not found at {:?}, using defaults", args.config);
    }

    let (raw, refs, summary) = match args.command {
        Command::Analyze => {
            let (raw, refs) = AnalysisInput::from_reader(io::stdin().lock())
                .context("Failed to read JSON input from stdin")?
                .into_parts();
            (raw, refs, None)
        }
        Command::Csv {
            trades,
            venues,
            prices,
        } => {
            let (raw, refs, summary) =
                ingest::load_csv(&trades, venues.as_deref(), prices.as_deref())
                    .context("Failed to load CSV input")?;
            (raw, refs, Some(summary))
        }
    };

    let mut report: AnalysisReport = Pipeline::new(config).run(&raw, &refs)?;
    report.ingest = summary;
    info!(
        "Report: {} anomalies, {} exclusions, {} volume bursts",
        report.anomalies.len(),
        report.exclusions.total,
        report.volume_bursts.len()
    );

    let out = io::stdout().lock();
    if args.pretty {
        serde_json::to_writer_pretty(out, &report)?;
    } else {
        serde_json::to_writer(out, &report)?;
    }
    println!();
    Ok(())
}
