//! relkit - reproducible staging and distribution assembly CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use relkit_cli::ui::Output;
use relkit_cli::{Cli, Commands, cmd};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let output = Output::new(cli.quiet);
    let config = cli.config.as_path();
    let offline = cli.offline;

    match cli.command {
        Commands::Resolve => cmd::resolve::resolve(config, offline, output).await,
        Commands::Expand => cmd::expand::expand(config, offline, output).await,
        Commands::Assemble { target } => {
            cmd::assemble::assemble(config, offline, target.as_deref(), output).await
        }
        Commands::Build { target } => {
            cmd::build::build(config, offline, target.as_deref(), output).await
        }
        Commands::Manifest => cmd::manifest::manifest(config, output),
        Commands::Clean { cache } => cmd::clean::clean(config, cache, output),
        Commands::Coordinate { text } => cmd::coordinate::coordinate(&text, output),
    }
}
