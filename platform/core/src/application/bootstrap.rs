// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Service wiring
//!
//! Builds the protection catalog, reconciles it with the persisted kind
//! table and assembles every application service on top of one repository
//! set. Used by the `serve` command and by integration tests.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::application::access_service::AccessService;
use crate::application::component_service::{ComponentService, PurgeReport};
use crate::application::content_service::ContentService;
use crate::application::repository_factory::create_repositories;
use crate::application::token_manager::{CapabilityTokenManager, TokenSettings};
use crate::application::travel_service::TravelService;
use crate::domain::authorization::AuthorizationEngine;
use crate::domain::catalog::{ProtectionCatalog, ReconcileReport};
use crate::domain::content::ContentVariantRegistry;
use crate::domain::platform_config::PlatformConfigSpec;
use crate::domain::referrer::ReferrerClient;
use crate::domain::repository::{KindRecord, ProtectionKindStore, RepositoryError};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::protections::builtin_catalog;
use crate::infrastructure::referrer_client::HttpReferrerClient;
use crate::infrastructure::repositories::Repositories;
use crate::infrastructure::session_store::SessionStore;

/// Compare the catalog with the persisted kind table and persist every
/// kind that is missing or whose capabilities changed. Orphaned records
/// are only reported.
pub async fn reconcile_catalog(
    catalog: &ProtectionCatalog,
    store: &dyn ProtectionKindStore,
) -> Result<ReconcileReport, RepositoryError> {
    let persisted = store.list_kinds().await?;
    let report = catalog.reconcile(&persisted);

    let stale = report.missing_in_store.iter().chain(report.ptype_changed.iter());
    let records: Vec<KindRecord> = catalog
        .records()
        .into_iter()
        .filter(|record| stale.clone().any(|code| code == &record.code))
        .collect();
    for record in &records {
        store.upsert_kind(record).await?;
    }

    if !report.orphaned.is_empty() {
        warn!(orphaned = ?report.orphaned, "Persisted protection kinds without implementation");
    }
    info!(
        registered = catalog.len(),
        persisted = records.len(),
        "Protection catalog reconciled"
    );
    Ok(report)
}

/// Result of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub purge: PurgeReport,
    pub expired_tokens: u64,
    pub idle_sessions: usize,
}

/// Every application service of a running platform.
#[derive(Clone)]
pub struct SpiderServices {
    pub config: Arc<PlatformConfigSpec>,
    pub repositories: Repositories,
    pub catalog: Arc<ProtectionCatalog>,
    pub engine: Arc<AuthorizationEngine>,
    pub event_bus: Arc<EventBus>,
    pub components: Arc<ComponentService>,
    pub contents: Arc<ContentService>,
    pub tokens: Arc<CapabilityTokenManager>,
    pub travel: Arc<TravelService>,
    pub access: Arc<AccessService>,
    pub sessions: Arc<SessionStore>,
}

impl SpiderServices {
    /// Connect storage and the HTTP referrer client from configuration.
    pub async fn from_config(spec: PlatformConfigSpec) -> Result<Self> {
        let repositories = create_repositories(&spec.database).await?;
        let referrer = HttpReferrerClient::new(&spec.referrer).context("Failed to build referrer HTTP client")?;
        Self::assemble(spec, repositories, Arc::new(referrer)).await
    }

    /// Wire the services on top of the given repositories.
    pub async fn assemble(
        spec: PlatformConfigSpec,
        repositories: Repositories,
        referrer: Arc<dyn ReferrerClient>,
    ) -> Result<Self> {
        let secret_key = spec.security.resolve_secret_key()?;

        let catalog = Arc::new(builtin_catalog(&spec, &secret_key)?);
        reconcile_catalog(&catalog, repositories.kinds.as_ref())
            .await
            .context("Failed to reconcile protection kinds")?;

        let engine = Arc::new(AuthorizationEngine::new(catalog.clone()));
        let event_bus = Arc::new(EventBus::default());

        let components = Arc::new(ComponentService::new(
            repositories.components.clone(),
            repositories.contents.clone(),
            repositories.users.clone(),
            catalog.clone(),
            event_bus.clone(),
            spec.security.min_login_strength,
            spec.security.default_token_ttl,
            spec.deletion.clone(),
        ));
        let contents = Arc::new(ContentService::new(
            repositories.components.clone(),
            repositories.contents.clone(),
            Arc::new(ContentVariantRegistry::with_builtin()),
        ));
        let tokens = Arc::new(CapabilityTokenManager::new(
            repositories.tokens.clone(),
            repositories.components.clone(),
            referrer,
            event_bus.clone(),
            TokenSettings::from_config(&spec),
        ));
        let travel = Arc::new(TravelService::new(
            repositories.travel.clone(),
            repositories.components.clone(),
            repositories.contents.clone(),
            repositories.users.clone(),
            components.clone(),
            contents.clone(),
            event_bus.clone(),
            secret_key,
            spec.travel.max_trigger_passwords,
        ));
        let access = Arc::new(AccessService::new(
            engine.clone(),
            repositories.components.clone(),
            repositories.contents.clone(),
            repositories.users.clone(),
            travel.clone(),
            event_bus.clone(),
        ));

        let sessions = Arc::new(SessionStore::new(spec.security.session_idle_timeout));

        Ok(Self {
            config: Arc::new(spec),
            repositories,
            catalog,
            engine,
            event_bus,
            components,
            contents,
            tokens,
            travel,
            access,
            sessions,
        })
    }

    /// Purge soft-deleted data past its grace period, expired tokens and
    /// idle sessions.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        let purge = self.components.purge_due(Utc::now()).await?;
        let expired_tokens = self.tokens.purge_expired(None).await?;
        let idle_sessions = self.sessions.purge_idle();
        Ok(MaintenanceReport {
            purge,
            expired_tokens,
            idle_sessions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::protection::{ProtectionCode, ProtectionType};
    use crate::infrastructure::repositories::InMemoryStore;

    #[tokio::test]
    async fn test_reconcile_persists_missing_and_keeps_orphans() {
        let store = InMemoryStore::new();
        store
            .upsert_kind(&KindRecord {
                code: ProtectionCode::new("retired"),
                ptype: ProtectionType::ACCESS_CONTROL,
            })
            .await
            .unwrap();
        store
            .upsert_kind(&KindRecord {
                code: ProtectionCode::new("password"),
                ptype: ProtectionType::ACCESS_CONTROL,
            })
            .await
            .unwrap();

        let catalog = builtin_catalog(&PlatformConfigSpec::default(), "secret").unwrap();
        let report = reconcile_catalog(&catalog, &store).await.unwrap();
        assert_eq!(report.orphaned, vec![ProtectionCode::new("retired")]);
        assert_eq!(report.ptype_changed, vec![ProtectionCode::new("password")]);

        let persisted = store.list_kinds().await.unwrap();
        assert_eq!(persisted.len(), catalog.len() + 1);
        let password = persisted
            .iter()
            .find(|r| r.code.as_str() == "password")
            .unwrap();
        assert!(password.ptype.contains(ProtectionType::PASSWORD));

        let again = reconcile_catalog(&catalog, &store).await.unwrap();
        assert!(again.missing_in_store.is_empty());
        assert!(again.ptype_changed.is_empty());
    }

    #[tokio::test]
    async fn test_assemble_in_memory() {
        let mut spec = PlatformConfigSpec::default();
        spec.security.secret_key = "test-secret".to_string();
        let referrer = Arc::new(HttpReferrerClient::new(&spec.referrer).unwrap());
        let services = SpiderServices::assemble(spec, Repositories::in_memory(), referrer)
            .await
            .unwrap();
        assert_eq!(services.catalog.len(), 6);
        let report = services.run_maintenance().await.unwrap();
        assert_eq!(report, MaintenanceReport::default());
    }
}
