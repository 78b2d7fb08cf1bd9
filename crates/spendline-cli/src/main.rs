//! spendline - USAspending award retrieval pipeline
//!
//! Pulls federal award records through the bulk-export API (with automatic
//! date-range splitting) or the paginated award search, and writes Parquet.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::{Parser, Subcommand};
use spendline_core::{CancelToken, ProgressContext};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "spendline")]
#[command(about = "USAspending award retrieval pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    quiet: bool,

    /// Config file path (default: ./spendline.toml or ~/.config/spendline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Maximum API requests per second (overrides USASPENDING_MAX_RPS)
    #[arg(long, global = true, value_parser = parse_rps_arg)]
    max_rps: Option<f64>,

    /// API root URL
    #[arg(long, global = true)]
    api_root: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Bulk-export a date range, splitting it on backend failures
    Backfill(cmd::backfill::BackfillArgs),
    /// Page through award search results in fixed-size windows
    Incremental(cmd::incremental::IncrementalArgs),
    /// Show current configuration
    Config,
}

fn parse_rps_arg(s: &str) -> Result<f64, String> {
    config::parse_rps(s).map_err(|e| format!("{e:#}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let progress = Arc::new(ProgressContext::new());
    let multi = if progress.is_tty() {
        Some(progress.multi())
    } else {
        None
    };
    spendline_core::init_logging(cli.quiet, cli.debug, multi);

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            log::error!("Configuration error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let result = match cli.command {
        Command::Backfill(args) => {
            let settings = config.pipeline_settings();
            cmd::backfill::run(args, &config, settings, setup_signal_handler(), &progress)
        }
        Command::Incremental(args) => {
            let settings = config.pipeline_settings();
            cmd::incremental::run(args, &config, settings, setup_signal_handler(), &progress)
        }
        Command::Config => {
            cmd::config::run(&config);
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            log::error!("Fatal error: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// File, then environment, then command-line flags
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    config.apply_env()?;
    if let Some(rps) = cli.max_rps {
        config.api.max_rps = rps;
    }
    if let Some(root) = &cli.api_root {
        config.api.base_url = root.clone();
    }
    Ok(config)
}

/// First signal cancels the run; a second one exits immediately.
fn setup_signal_handler() -> CancelToken {
    let cancel = CancelToken::new();
    for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        let flag = cancel.flag();
        // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
        let registered = unsafe {
            signal_hook::low_level::register(signal, move || {
                if flag.swap(true, Ordering::Relaxed) {
                    std::process::exit(130);
                }
            })
        };
        if let Err(e) = registered {
            log::warn!("Cannot register handler for signal {signal}: {e}");
        }
    }
    cancel
}
