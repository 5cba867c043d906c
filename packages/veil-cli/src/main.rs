//! Veil CLI - command-line front end for a multi-device identity
//!
//! Each device keeps its encrypted wallet in its own home directory
//! (`--home` or `VEIL_HOME`, default `<data dir>/veil`). Pairing and sync
//! between two homes on the same machine run both sides in one process.

mod commands;
mod home;
mod oracle;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,veil_core=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Veil CLI on core v{}", veil_core::version());

    let cli = commands::Cli::parse();
    commands::run(cli).await
}
