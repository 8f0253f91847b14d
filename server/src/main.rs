//! Identity Daemon Entry Point
//!
//! Opens the identity-tracker service over local stores and keeps the
//! mapping reconciled until interrupted. With `--once` it runs a single
//! sync cycle and orphan cleanup, then exits.

use clap::Parser;
use identity_daemon::{Daemon, Overrides};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "identity-daemon")]
#[command(about = "Cross-store identity tracking and reconciliation daemon")]
#[command(version)]
struct Args {
    /// JSON configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Directory holding the mapping table and vector index
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Seconds between mapping sync cycles
    #[arg(long)]
    sync_interval_secs: Option<u64>,

    /// Seconds between orphan vector cleanups
    #[arg(long)]
    cleanup_interval_secs: Option<u64>,

    /// Embedding length of the vector index
    #[arg(long)]
    vector_dimension: Option<usize>,

    /// Run one reconciliation cycle and exit
    #[arg(long)]
    once: bool,

    /// Verbose logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_filter = if args.verbose {
        "identity_daemon=debug,identity_tracker=debug"
    } else {
        "identity_daemon=info,identity_tracker=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let overrides = Overrides {
        config: args.config,
        data_dir: args.data_dir,
        sync_interval_secs: args.sync_interval_secs,
        cleanup_interval_secs: args.cleanup_interval_secs,
        vector_dimension: args.vector_dimension,
    };

    let daemon = match Daemon::open(&overrides) {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::error!("Startup failed: {}", e);
            std::process::exit(e.exit_code());
        }
    };

    let result = if args.once {
        tracing::info!("Running a single reconciliation cycle");
        daemon.run_once().await
    } else {
        tracing::info!("Starting identity daemon");
        daemon.run_until(tokio::signal::ctrl_c()).await
    };

    if let Err(e) = result {
        tracing::error!("Identity daemon error: {}", e);
        std::process::exit(e.exit_code());
    }
}
