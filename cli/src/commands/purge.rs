// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! One-shot maintenance pass

use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

use super::connect;

pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let services = connect(config_path).await?;
    let report = services.run_maintenance().await?;

    println!("{}", "Maintenance finished:".bold());
    println!("  Contents purged:   {}", report.purge.contents);
    println!("  Components purged: {}", report.purge.components);
    println!("  Expired tokens:    {}", report.expired_tokens);
    if report.purge.failures > 0 {
        println!(
            "{}",
            format!("  {} deletion(s) failed, see the log", report.purge.failures).yellow()
        );
    }
    Ok(())
}
