// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Spider CLI
//!
//! The `spider` binary runs the platform HTTP server and the administrative
//! maintenance commands.
//!
//! ## Commands
//!
//! - `spider serve` - Run the HTTP API with periodic maintenance
//! - `spider tokens revoke` - Bulk token revocation
//! - `spider catalog list|check` - Inspect the protection catalog
//! - `spider config show|validate|generate` - Configuration management
//! - `spider purge` - Purge soft-deleted data and expired tokens once

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use spider_cli::commands::{self, CatalogCommand, ConfigCommand, ServeArgs, TokensCommand};

/// Spider - protected content platform
#[derive(Parser)]
#[command(name = "spider")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "SPIDER_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "SPIDER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    #[command(name = "serve")]
    Serve(ServeArgs),

    /// Capability token maintenance
    #[command(name = "tokens")]
    Tokens {
        #[command(subcommand)]
        command: TokensCommand,
    },

    /// Protection catalog inspection
    #[command(name = "catalog")]
    Catalog {
        #[command(subcommand)]
        command: CatalogCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Purge soft-deleted components, contents and expired tokens
    #[command(name = "purge")]
    Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Serve(args)) => commands::serve::execute(args, cli.config).await,
        Some(Commands::Tokens { command }) => commands::tokens::handle_command(command, cli.config).await,
        Some(Commands::Catalog { command }) => commands::catalog::handle_command(command, cli.config).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        Some(Commands::Purge) => commands::purge::execute(cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
