// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Capability token maintenance
//!
//! Commands: revoke, purge-expired

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use uuid::Uuid;

use spider_core::domain::component::ComponentId;
use spider_core::domain::token::AnchorFilter;

use super::connect;

#[derive(Subcommand)]
pub enum TokensCommand {
    /// Revoke tokens in bulk
    Revoke {
        /// Only tokens bound to this referrer url
        #[arg(long, conflicts_with_all = ["oldest", "days"])]
        referrer: Option<String>,

        /// Revoke the N oldest matching tokens
        #[arg(long, value_name = "N", conflicts_with = "days")]
        oldest: Option<usize>,

        /// Revoke tokens older than N days
        #[arg(long, value_name = "N")]
        days: Option<u32>,

        /// Restrict to one component
        #[arg(long, value_name = "UUID")]
        component: Option<Uuid>,

        /// ephemeral, component, persist, all or a content id
        #[arg(long, default_value = "ephemeral", value_parser = parse_anchor)]
        anchor: AnchorFilter,
    },

    /// Delete expired ephemeral tokens
    PurgeExpired {
        /// Restrict to one component
        #[arg(long, value_name = "UUID")]
        component: Option<Uuid>,
    },
}

fn parse_anchor(raw: &str) -> Result<AnchorFilter, String> {
    raw.parse()
}

pub async fn handle_command(command: TokensCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        TokensCommand::Revoke {
            referrer,
            oldest,
            days,
            component,
            anchor,
        } => revoke(config_path, referrer, oldest, days, component.map(ComponentId), anchor).await,
        TokensCommand::PurgeExpired { component } => purge_expired(config_path, component.map(ComponentId)).await,
    }
}

async fn revoke(
    config_path: Option<PathBuf>,
    referrer: Option<String>,
    oldest: Option<usize>,
    days: Option<u32>,
    component: Option<ComponentId>,
    anchor: AnchorFilter,
) -> Result<()> {
    if referrer.is_none() && oldest.is_none() && days.is_none() {
        bail!("one of --referrer, --oldest or --days is required");
    }

    let services = connect(config_path).await?;
    let tokens = &services.tokens;
    let revoked = match (referrer, oldest, days) {
        (Some(referrer), _, _) => tokens.revoke_for_referrer(&referrer, anchor).await?,
        (None, Some(count), _) => tokens.revoke_oldest(component, count, anchor).await?,
        (None, None, Some(days)) => tokens.revoke_by_age(component, days, anchor).await?,
        (None, None, None) => 0,
    };

    println!("{}", format!("✓ Revoked {} token(s)", revoked).green());
    Ok(())
}

async fn purge_expired(config_path: Option<PathBuf>, component: Option<ComponentId>) -> Result<()> {
    let services = connect(config_path).await?;
    let purged = services.tokens.purge_expired(component).await?;
    println!("{}", format!("✓ Purged {} expired token(s)", purged).green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_anchor() {
        assert_eq!(parse_anchor("all").unwrap(), AnchorFilter::All);
        let id = Uuid::new_v4();
        assert!(matches!(parse_anchor(&id.to_string()).unwrap(), AnchorFilter::Content(_)));
        assert!(parse_anchor("sometimes").is_err());
    }
}
