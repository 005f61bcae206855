//! CLI command definitions and dispatch.

mod install;
mod serve;
mod status;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use carolus_offline::config::Config;

/// Offline-first caching gateway for the Carolus web UI.
#[derive(Parser)]
#[command(name = "carolus-offline", version, about)]
pub(crate) struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to a config file (defaults to ~/.carolus-offline/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Precache the UI assets and serve requests (default)
    Serve {
        /// Gateway listen port (overrides config)
        #[arg(long)]
        port: Option<u16>,
        /// Origin base URL (overrides config)
        #[arg(long)]
        origin: Option<String>,
    },
    /// Precache the UI assets and exit
    Install {
        /// Origin base URL (overrides config)
        #[arg(long)]
        origin: Option<String>,
    },
    /// Show configuration and cache contents
    Status,
}

fn init_tracing(verbose: u8, json: bool) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    init_tracing(cli.verbose, config.log.json);

    match cli.command.unwrap_or(Commands::Serve {
        port: None,
        origin: None,
    }) {
        Commands::Serve { port, origin } => serve::cmd_serve(config, port, origin).await,
        Commands::Install { origin } => install::cmd_install(config, origin).await,
        Commands::Status => status::cmd_status(config).await,
    }
}
