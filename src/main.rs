//! clipstash - clipboard history manager
//!
//! This is the main entry point for the clipstash daemon and CLI.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipstash::cli::{Cli, CliHandler, Commands, ConfigAction};
use clipstash::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // `config init` must work even when the existing file does not parse.
    let mut handler = match &cli.command {
        Commands::Config {
            action: ConfigAction::Init { .. },
        } => CliHandler::with_config(Arc::new(Config::default()), cli.config.clone()),
        _ => CliHandler::new(cli.config.clone())?,
    };

    // Initialize logging
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        handler.config().log_level.clone()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("clipstash={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    debug!("clipstash v{}", clipstash::VERSION);

    handler.handle_command(cli.command).await?;

    Ok(())
}
