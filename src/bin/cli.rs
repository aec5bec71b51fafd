//! Metrics refresher CLI
//!
//! Runs one refresh pass per invocation; periodic scheduling is left to
//! whatever invokes the binary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use metrics_refresher::{
    error::Result,
    models::Config,
    pipeline::{self, RefreshDeps, RunReport},
    services::ClipMetricsClient,
    storage::PostgrestStore,
    utils::http,
};

/// refresher - stale clip metrics updater
#[derive(Parser, Debug)]
#[command(
    name = "refresher",
    version,
    about = "Refreshes view and like counters for stale clip records"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one refresh pass
    Run {
        /// Only page candidates and report how many would be queued
        #[arg(long)]
        dry_run: bool,

        /// Override the number of concurrent workers
        #[arg(long)]
        workers: Option<usize>,

        /// Override the creation window in days
        #[arg(long)]
        window_days: Option<u32>,

        /// Override the staleness threshold in hours
        #[arg(long)]
        refresh_hours: Option<u32>,
    },

    /// Validate the effective configuration
    Validate,

    /// Print the effective configuration with secrets redacted
    ShowConfig,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load_or_default(&cli.config);
    config.apply_env();

    match cli.command {
        Command::Run {
            dry_run,
            workers,
            window_days,
            refresh_hours,
        } => {
            if let Some(n) = workers {
                config.crawler.workers = n;
            }
            if let Some(days) = window_days {
                config.refresh.window_days = days;
            }
            if let Some(hours) = refresh_hours {
                config.refresh.refresh_hours = hours;
            }

            config.validate()?;
            config.validate_store_credentials()?;

            let store_client = http::create_store_client(config.crawler.timeout_secs)?;
            let store = Arc::new(PostgrestStore::new(store_client, &config.store)?);
            let upstream = http::create_client(&config.crawler)?;
            let source = Arc::new(ClipMetricsClient::from_config(upstream, &config.crawler));
            let deps = RefreshDeps::from_store(store, source);

            if dry_run {
                match pipeline::dry_run(&config, &deps).await? {
                    Some(count) => log::info!("Dry run complete: {} candidates", count),
                    None => log::info!("Dry run complete: no categories"),
                }
                return Ok(());
            }

            match pipeline::run_refresh(&config, deps).await {
                Ok(RunReport::NoCategories) => log::info!("Nothing to refresh"),
                Ok(RunReport::Completed(summary)) => {
                    log::info!("Refresh complete: {} queued", summary.queued)
                }
                Err(e) => {
                    log::error!("Refresh aborted: {}", e);
                    return Err(e);
                }
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");

            match config.validate_store_credentials() {
                Ok(()) => log::info!("✓ Store credentials present"),
                Err(e) => log::warn!("Store not usable yet: {}", e),
            }
        }

        Command::ShowConfig => {
            println!("{}", toml::to_string_pretty(&config.redacted())?);
        }
    }

    Ok(())
}
