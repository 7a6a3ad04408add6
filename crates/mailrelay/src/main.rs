//! `mailrelay` - polls a mailbox and relays administrator newsletters to a
//! CSV roster, forwarding subscriber replies back to the administrator.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use mailrelay_core::{
    Credentials, RelayConfig, RelayService, RosterStore, shutdown_channel, spawn_signal_listener,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Before logging so RUST_LOG may come from .env
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    let path = cli.config_path()?;
    let config = RelayConfig::load(&path)
        .with_context(|| format!("invalid configuration {}", path.display()))?;

    if cli.check {
        return check(&config);
    }

    let credentials = Credentials::from_env(&config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting mailrelay");
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?
        .block_on(run(config, &credentials))
}

async fn run(config: RelayConfig, credentials: &Credentials) -> Result<()> {
    let (trigger, shutdown) = shutdown_channel();
    let listener = spawn_signal_listener(trigger);

    let mut service = RelayService::connect_to(config, credentials)?;
    let result = service.run(shutdown).await;
    listener.abort();

    result.context("relay failed to start")
}

fn check(config: &RelayConfig) -> Result<()> {
    let roster = RosterStore::load(config.roster_path.clone())
        .with_context(|| format!("invalid roster {}", config.roster_path.display()))?;

    println!(
        "Configuration OK: {} subscribers in {}",
        roster.len(),
        config.roster_path.display()
    );
    Ok(())
}
