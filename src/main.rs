//! predarb - cross-venue prediction-market arbitrage trader.
//!
//! Headless process with an interactive operator shell on stdin. Exits 0
//! on clean shutdown, 1 on unrecoverable startup error.

use anyhow::Result;
use clap::Parser;
use predarb::application::system::Application;
use predarb::config::{Config, Mode};
use predarb::interfaces::cli;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
#[command(name = "predarb", version, about = "Cross-venue prediction-market arbitrage trader")]
struct Args {
    /// Load environment from this file instead of `.env`.
    #[arg(long)]
    env_file: Option<std::path::PathBuf>,

    /// Force dry-run mode regardless of OPERATING_MODE.
    #[arg(long)]
    dry_run: bool,

    /// Run without the interactive shell (service deployment); shutdown
    /// via SIGINT.
    #[arg(long)]
    no_shell: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match &args.env_file {
        Some(path) => {
            dotenvy::from_path(path).ok();
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("predarb {} starting", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env()?;
    if args.dry_run {
        config.operating_mode = Mode::DryRun;
    }
    info!(
        mode = %config.operating_mode,
        scan_interval_ms = config.scan_interval_ms,
        "Configuration loaded"
    );

    let app = Application::build(config).await?;
    let handle = app.start().await?;
    info!("System running");

    if args.no_shell {
        tokio::signal::ctrl_c().await?;
        info!("SIGINT received");
    } else {
        tokio::select! {
            _ = cli::run_shell(&handle) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received");
            }
        }
    }

    handle.shutdown().await;
    info!("Clean shutdown complete");
    Ok(())
}
