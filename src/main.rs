// Entry point of the drive-templater command line tool.
//
// **Architecture Overview:**
// - `core/` = Business logic (folder tree resolution, template workflow)
// - `infra/` = Implementations of core traits (Google Drive/Docs over HTTP)
// - `cli/` = Command line adapter (argument parsing, output)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize logging
// 3. Hand over to the selected command

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with several mod.rs files that all look the same.
#[path = "cli/cli_layer.rs"]
mod cli;
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Quiet by default; RUST_LOG=debug shows every API call
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = cli.execute().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
