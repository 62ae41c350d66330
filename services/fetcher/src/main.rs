//! EMIT granule fetcher CLI.
//!
//! Retrieves EMIT L2A reflectance granules from NASA Earthdata with:
//! - NetCDF validation of every downloaded file
//! - Automatic re-download of corrupted files with exponential backoff
//! - Time-series retrieval over a date range and search area
//! - Cache inspection and cleanup tooling for network filesystems

mod check;
mod fetch;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "emit-fetcher")]
#[command(about = "EMIT L2A reflectance granule fetcher with NetCDF validation")]
struct Args {
    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Retrieve a single granule by orbit and scene
    Granule(fetch::GranuleArgs),
    /// Retrieve every granule across a date range and search area
    Timeseries(fetch::TimeseriesArgs),
    /// Validate NetCDF files and report; exits 1 if any file is invalid
    Check(check::CheckArgs),
    /// Remove invalid NetCDF files from a cache directory
    Clean(check::CleanArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Granule(args) => fetch::run_granule(args).await,
        Command::Timeseries(args) => fetch::run_timeseries(args).await,
        Command::Check(args) => {
            let all_valid = check::run_check(args)?;
            if !all_valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Clean(args) => check::run_clean(args).await,
    }
}
