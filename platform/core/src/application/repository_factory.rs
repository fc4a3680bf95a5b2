// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Picks the storage backend from the database configuration and builds the
//! matching repository set. PostgreSQL schemas are created on first use.

use anyhow::{Context, Result};
use tracing::info;

use crate::domain::platform_config::DatabaseConfig;
use crate::domain::repository::{PostgresConfig, StorageBackend};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::Repositories;

pub fn storage_backend(config: &DatabaseConfig) -> StorageBackend {
    match &config.url {
        Some(url) => StorageBackend::PostgreSQL(PostgresConfig {
            connection_string: url.clone(),
        }),
        None => StorageBackend::InMemory,
    }
}

/// Creates the repositories of the configured backend
pub async fn create_repositories(config: &DatabaseConfig) -> Result<Repositories> {
    match storage_backend(config) {
        StorageBackend::InMemory => {
            info!("Using in-memory storage");
            Ok(Repositories::in_memory())
        }
        StorageBackend::PostgreSQL(pg) => {
            let db = Database::new(&pg.connection_string, config.max_connections)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.ensure_schema().await.context("Failed to create database schema")?;
            info!(max_connections = config.max_connections, "Using PostgreSQL storage");
            Ok(Repositories::postgres(db.get_pool().clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_selection() {
        let mut config = DatabaseConfig::default();
        assert!(matches!(storage_backend(&config), StorageBackend::InMemory));

        config.url = Some("postgres://spider@localhost/spider".to_string());
        match storage_backend(&config) {
            StorageBackend::PostgreSQL(pg) => assert!(pg.connection_string.starts_with("postgres://")),
            other => panic!("unexpected backend {other:?}"),
        }
    }
}
