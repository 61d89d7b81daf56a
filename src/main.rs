//! CLI Entry Point for rp-continuity
//!
//! Uploads the reference waveform to a Red Pitaya radar, triggers
//! streaming and checks every received burst for discontinuities. Each
//! anomalous burst prints its maximum adjacent step on stdout; logs go to
//! stderr.
//!
//! # Usage
//!
//! ```bash
//! rp-continuity
//! rp-continuity --config lab.toml
//! rp-continuity --mock
//! ```
//!
//! Runs until interrupted (Ctrl-C) unless `monitor.run_for` or
//! `monitor.max_bursts` is configured.

use anyhow::{Context, Result};
use clap::Parser;
use rp_continuity::config::AppConfig;
use rp_continuity::{logging, run};
use rp_continuity::driver::StopSignal;
use std::path::PathBuf;

// Use mimalloc for the large burst buffer and mock streaming chunks
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "rp-continuity")]
#[command(about = "Red Pitaya radar stream continuity monitor", long_about = None)]
struct Cli {
    /// Configuration file (default: config/rp_continuity.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stream from the built-in device emulator instead of hardware
    #[arg(long)]
    mock: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::load()?,
    };
    if cli.mock {
        config.device.mock = true;
    }
    config.validate()?;

    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
    tracing::info!("rp-continuity starting (device {})", config.device.address());

    let (handle, signal) = StopSignal::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::info!("Interrupt received, stopping");
        handle.stop();
        // A second interrupt exits without waiting for the session
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Second interrupt, exiting");
            std::process::exit(130);
        }
    });

    let mut stdout = std::io::stdout().lock();
    run::run(&config, signal, &mut stdout).await?;
    Ok(())
}
