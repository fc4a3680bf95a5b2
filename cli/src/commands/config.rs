// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use spider_core::domain::platform_config::PlatformConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with every default spelled out
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./spider-config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, force } => generate(&output, force).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = PlatformConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. SPIDER_CONFIG_PATH: {}",
            std::env::var("SPIDER_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./spider-config.yaml");
        println!("  4. ~/.spider/config.yaml");
        println!("  5. /etc/spider/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Security:".bold());
    println!("  Min login strength: {}", spec.security.min_login_strength);
    println!(
        "  Default token TTL: {}s",
        spec.security.default_token_ttl.as_secs()
    );
    println!("  Token size: {}", spec.security.token_size);
    println!("  Hash algorithm: {}", spec.security.hash_algorithm);
    let secret = if spec.security.secret_key.starts_with("env:") {
        spec.security.secret_key.clone()
    } else {
        "(inline, hidden)".to_string()
    };
    println!("  Secret key: {}", secret);
    println!();

    println!("{}", "Referrers:".bold());
    println!("  Timeout: {}s", spec.referrer.timeout.as_secs());
    println!("  Allow insecure http: {}", spec.referrer.allow_insecure_http);
    println!("  Error rate per hour: {}", spec.referrer.error_rate_per_hour);
    println!();

    println!("{}", "Storage:".bold());
    match &spec.database.url {
        Some(_) => println!("  Backend: postgres (max {} connections)", spec.database.max_connections),
        None => println!("  Backend: {}", "in-memory".yellow()),
    }
    println!();

    println!("{}", "Server:".bold());
    println!("  Listen: {}:{}", spec.server.bind_address, spec.server.port);
    match spec.observability.metrics_port {
        Some(port) => println!("  Metrics port: {}", port),
        None => println!("  Metrics port: {}", "(disabled)".dimmed()),
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = PlatformConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

async fn generate(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists, use --force to overwrite", output.display());
    }

    PlatformConfigManifest::default()
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_config_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spider-config.yaml");

        generate(&path, false).await.unwrap();
        assert!(generate(&path, false).await.is_err());
        generate(&path, true).await.unwrap();

        let manifest = PlatformConfigManifest::from_yaml_file(&path).unwrap();
        manifest.validate().unwrap();
        assert_eq!(manifest.spec.security.secret_key, "env:SPIDER_SECRET_KEY");
    }
}
