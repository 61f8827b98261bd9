//! # doctrans-auth
//!
//! Signs in to the Document Translation service and hands out access tokens.
//!
//! ```bash
//! # Acquire a token (browser sign-in on first use) and show its expiry
//! doctrans-auth token
//!
//! # Print the signed-in principal, then discard the session
//! doctrans-auth --sign-out whoami
//!
//! # Show the endpoints of a cloud
//! doctrans-auth endpoints --cloud AzureChina
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

mod commands;
mod config;
mod error;
mod logger;

/// Document Translation sign-in tool
#[derive(Parser)]
#[command(name = "doctrans-auth", version)]
#[command(about = "Document Translation OAuth2 sign-in tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./doctrans.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use the device code flow instead of the system browser
    #[arg(long, global = true)]
    device_code: bool,

    /// Discard the session before exiting
    #[arg(long, global = true)]
    sign_out: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire an access token
    Token {
        /// Print the token itself
        #[arg(long)]
        show: bool,
    },
    /// Show the signed-in user
    Whoami,
    /// Show the authority and default scope of a cloud
    Endpoints {
        /// Cloud environment (defaults to the configured one)
        #[arg(long)]
        cloud: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    logger::setup_logger(config.logging(), cli.verbose)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, abandoning sign-in");
            interrupt.cancel();
        }
    });

    if let Err(e) = run(cli, &config, &cancel).await {
        log::error!("{e}");
        if let Some(hint) = e.hint() {
            eprintln!("{hint}");
        }
        return Err(e.into());
    }
    Ok(())
}

async fn run(
    cli: Cli,
    config: &config::AppConfig,
    cancel: &CancellationToken,
) -> Result<(), error::AppError> {
    if let Commands::Endpoints { cloud } = &cli.command {
        return commands::endpoints(config, cloud.as_deref());
    }

    let credential = commands::build_credential(config, cli.device_code)?;
    match cli.command {
        Commands::Token { show } => commands::token(&credential, cancel, show).await?,
        Commands::Whoami => commands::whoami(&credential, cancel).await?,
        Commands::Endpoints { .. } => {}
    }

    if cli.sign_out {
        commands::sign_out(&credential).await?;
    }
    Ok(())
}
