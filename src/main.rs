#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::uninlined_format_args)]

//! Photon - unified CLI entrypoint.
//!
//! Usage:
//!   photon start --config config/photon.toml

use anyhow::Result;
use clap::Parser;
use photon::cli::commands::run_start;
use photon::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => run_start(args).await,
    }
}
