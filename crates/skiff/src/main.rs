//! Skiff: mobile browser shell
//!
//! Main entry point. Initializes the global allocator, sets up logging,
//! wires the adblock components into the web profile and runs the
//! requested command.

use anyhow::Result;
use clap::Parser;
use tracing::info;

mod app;
mod cli;
mod commands;
mod logging;
mod profile;

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    logging::init(args.verbose, args.quiet);

    info!("Skiff starting...");

    let data_dir = args.data_dir.clone().unwrap_or_else(skiff_adblock::default_data_dir);
    let config_dir = args
        .config_dir
        .clone()
        .unwrap_or_else(skiff_adblock::default_config_dir);

    let mut app = app::App::new(&data_dir, &config_dir, !args.no_adblock)?;
    commands::run(args.command, &mut app).await
}
