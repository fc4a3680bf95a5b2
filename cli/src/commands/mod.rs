// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Spider CLI

pub mod catalog;
pub mod config;
pub mod purge;
pub mod serve;
pub mod tokens;

pub use self::catalog::CatalogCommand;
pub use self::config::ConfigCommand;
pub use self::serve::ServeArgs;
pub use self::tokens::TokensCommand;

use anyhow::{Context, Result};
use std::path::PathBuf;

use spider_core::application::SpiderServices;
use spider_core::domain::platform_config::PlatformConfigManifest;

/// Load and validate the configuration manifest.
pub fn load_config(config_path: Option<PathBuf>) -> Result<PlatformConfigManifest> {
    let manifest = PlatformConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    manifest.validate().context("Configuration validation failed")?;
    Ok(manifest)
}

/// Load configuration and connect every service.
pub async fn connect(config_path: Option<PathBuf>) -> Result<SpiderServices> {
    let manifest = load_config(config_path)?;
    SpiderServices::from_config(manifest.spec)
        .await
        .context("Failed to initialize services")
}
