//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Photon - reliable WebSocket RPC server.
#[derive(Parser)]
#[command(name = "photon")]
#[command(version)]
#[command(about = "Photon reliable WebSocket RPC server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the Photon server
    Start(StartArgs),
}

#[derive(Args)]
pub struct StartArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/photon.toml")]
    pub config: PathBuf,

    /// Override the configured bind address
    #[arg(long)]
    pub bind: Option<String>,

    /// Override the configured log filter
    #[arg(long)]
    pub log_level: Option<String>,
}
