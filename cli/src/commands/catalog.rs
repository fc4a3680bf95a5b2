// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Protection catalog inspection
//!
//! Commands: list, check

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use spider_core::application::repository_factory::create_repositories;
use spider_core::domain::protection::{ProtectionKind, ProtectionType};
use spider_core::domain::repository::ProtectionKindStore;
use spider_core::infrastructure::protections::builtin_catalog;

use super::load_config;

#[derive(Subcommand)]
pub enum CatalogCommand {
    /// List registered protection kinds
    List,

    /// Compare the registered kinds with the persisted kind table
    Check,
}

pub async fn handle_command(command: CatalogCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        CatalogCommand::List => list(config_path).await,
        CatalogCommand::Check => check(config_path).await,
    }
}

async fn list(config_path: Option<PathBuf>) -> Result<()> {
    let manifest = load_config(config_path)?;
    let secret = manifest.spec.security.resolve_secret_key()?;
    let catalog = builtin_catalog(&manifest.spec, &secret).context("Failed to build protection catalog")?;

    println!("{}", "Protection kinds:".bold());
    for kind in catalog.list(ProtectionType::NONE) {
        let range = kind.strength_range();
        println!(
            "  {:<12} {:<16} type={:<6} strength={}..{}",
            kind.code().to_string().bold(),
            kind.name(),
            kind.ptype(),
            range.min,
            range.max
        );
    }
    Ok(())
}

async fn check(config_path: Option<PathBuf>) -> Result<()> {
    let manifest = load_config(config_path)?;
    let secret = manifest.spec.security.resolve_secret_key()?;
    let catalog = builtin_catalog(&manifest.spec, &secret).context("Failed to build protection catalog")?;
    let repositories = create_repositories(&manifest.spec.database).await?;
    let persisted = repositories
        .kinds
        .list_kinds()
        .await
        .context("Failed to read persisted protection kinds")?;

    let report = catalog.reconcile(&persisted);
    for code in &report.missing_in_store {
        println!("  {} {} (persisted on next start)", "missing:".yellow(), code);
    }
    for code in &report.ptype_changed {
        println!("  {} {}", "type changed:".yellow(), code);
    }
    for code in &report.orphaned {
        println!("  {} {} (no implementation)", "orphaned:".red(), code);
    }

    if !report.is_consistent() {
        bail!("protection catalog is inconsistent with the persisted kinds");
    }
    println!("{}", "✓ Protection catalog is consistent".green());
    Ok(())
}
