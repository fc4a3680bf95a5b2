// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Component Service
//!
//! Application service owning the component lifecycle: signup (the reserved
//! login gate and its decoy), protection assignment, features and deferred
//! deletion.
//!
//! Every change to the assignment set goes through
//! `ComponentRepository::update_protections`, which recomputes the derived
//! strength inside the same transaction. A rejected recompute (e.g. a login
//! gate below the configured minimum) leaves storage untouched.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::domain::catalog::{CatalogError, ProtectionCatalog};
use crate::domain::component::{Component, ComponentError, ComponentId, Feature, FAKE_INDEX_NAME, INDEX_NAME};
use crate::domain::events::ComponentEvent;
use crate::domain::platform_config::DeletionConfig;
use crate::domain::protection::{AssignedProtection, ProtectionCode, ProtectionError, ProtectionState};
use crate::domain::repository::{
    ComponentRepository, ContentRepository, ProtectionUpdateError, RepositoryError, UserRepository,
};
use crate::domain::strength::calculate_protection_strength;
use crate::domain::user::{User, UserId};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Error)]
pub enum ComponentServiceError {
    #[error("component not found")]
    NotFound,

    #[error("user '{0}' already exists")]
    UserExists(String),

    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Protection(#[from] ProtectionError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<ProtectionUpdateError> for ComponentServiceError {
    fn from(err: ProtectionUpdateError) -> Self {
        match err {
            ProtectionUpdateError::Repository(RepositoryError::NotFound(_)) => Self::NotFound,
            ProtectionUpdateError::Repository(err) => Self::Repository(err),
            ProtectionUpdateError::Rejected(err) => Self::Component(err),
        }
    }
}

/// Outcome of a deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionOutcome {
    /// Nothing depended on the component; it is gone.
    Deleted,
    /// Deleted by `purge_due` once the grace period has elapsed.
    Scheduled(DateTime<Utc>),
}

/// Counts of one purge sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub contents: usize,
    pub components: usize,
    pub failures: usize,
}

pub struct ComponentService {
    components: Arc<dyn ComponentRepository>,
    contents: Arc<dyn ContentRepository>,
    users: Arc<dyn UserRepository>,
    catalog: Arc<ProtectionCatalog>,
    event_bus: Arc<EventBus>,
    min_login_strength: u8,
    default_token_ttl: Duration,
    deletion: DeletionConfig,
}

impl ComponentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        components: Arc<dyn ComponentRepository>,
        contents: Arc<dyn ContentRepository>,
        users: Arc<dyn UserRepository>,
        catalog: Arc<ProtectionCatalog>,
        event_bus: Arc<EventBus>,
        min_login_strength: u8,
        default_token_ttl: Duration,
        deletion: DeletionConfig,
    ) -> Self {
        Self {
            components,
            contents,
            users,
            catalog,
            event_bus,
            min_login_strength,
            default_token_ttl,
            deletion,
        }
    }

    /// Create an account with its login gate and decoy login gate.
    ///
    /// Both reserved components start without protections; the owner has to
    /// assign enough of them before the login gate can grant anything.
    pub async fn signup(&self, username: &str) -> Result<User, ComponentServiceError> {
        if self.users.find_by_username(username).await?.is_some() {
            return Err(ComponentServiceError::UserExists(username.to_string()));
        }
        let user = User::new(username);
        self.users.save(&user).await?;

        for name in [INDEX_NAME, FAKE_INDEX_NAME] {
            let component = Component::new_reserved(user.id, name, self.default_token_ttl)?;
            self.components.save(&component).await?;
        }

        info!(user_id = %user.id, username, "Created account");
        Ok(user)
    }

    pub async fn create_component(&self, owner: UserId, name: &str) -> Result<Component, ComponentServiceError> {
        let component = Component::new(owner, name, self.default_token_ttl)?;
        self.components.save(&component).await?;
        info!(component_id = %component.id, owner = %owner, name, "Created component");
        Ok(component)
    }

    pub async fn get(&self, id: ComponentId) -> Result<Component, ComponentServiceError> {
        self.components
            .find_by_id(id)
            .await?
            .ok_or(ComponentServiceError::NotFound)
    }

    pub async fn get_by_name(&self, owner: UserId, name: &str) -> Result<Component, ComponentServiceError> {
        self.components
            .find_component(owner, name)
            .await?
            .ok_or(ComponentServiceError::NotFound)
    }

    /// Recompute the derived strength of `component` from `assignments`.
    ///
    /// Assignments of unregistered kinds contribute nothing.
    pub fn recompute_strength(
        &self,
        component: &mut Component,
        assignments: &[AssignedProtection],
    ) -> Result<(), ComponentError> {
        let ranges: Vec<_> = assignments
            .iter()
            .filter_map(|assignment| {
                let kind = self.catalog.get(&assignment.code).ok()?;
                Some((assignment.state, kind.configured_strength(&assignment.data)))
            })
            .collect();
        let protection = calculate_protection_strength(component.required_passes, &ranges);
        component.apply_protection_strength(protection, self.min_login_strength)
    }

    /// Upsert and remove assignments, then recompute strength atomically.
    pub async fn update_protections(
        &self,
        component: ComponentId,
        upserts: Vec<AssignedProtection>,
        removals: Vec<ProtectionCode>,
    ) -> Result<Component, ComponentServiceError> {
        for assignment in &upserts {
            let kind = self.catalog.get(&assignment.code)?;
            kind.validate_config(&assignment.data)?;
        }
        let upserts: Vec<_> = upserts
            .into_iter()
            .map(|mut assignment| {
                assignment.component_id = component;
                assignment
            })
            .collect();

        let recompute = |component: &mut Component, merged: &[AssignedProtection]| {
            self.recompute_strength(component, merged)
        };
        let updated = self
            .components
            .update_protections(component, &upserts, &removals, &recompute)
            .await?;

        self.publish_changed(&updated);
        Ok(updated)
    }

    /// Change the number of passes required and recompute strength.
    pub async fn set_required_passes(
        &self,
        component: ComponentId,
        required_passes: u32,
    ) -> Result<Component, ComponentServiceError> {
        let recompute = |component: &mut Component, merged: &[AssignedProtection]| {
            component.required_passes = required_passes;
            self.recompute_strength(component, merged)
        };
        let updated = self
            .components
            .update_protections(component, &[], &[], &recompute)
            .await?;
        self.publish_changed(&updated);
        Ok(updated)
    }

    pub async fn set_public(&self, component: ComponentId, public: bool) -> Result<Component, ComponentServiceError> {
        let recompute = |component: &mut Component, merged: &[AssignedProtection]| {
            component.set_public(public)?;
            self.recompute_strength(component, merged)
        };
        let updated = self
            .components
            .update_protections(component, &[], &[], &recompute)
            .await?;
        self.publish_changed(&updated);
        Ok(updated)
    }

    /// Make a component unusable: private, at least one pass required and
    /// every assignment disabled.
    pub async fn lockdown(&self, component: ComponentId) -> Result<Component, ComponentServiceError> {
        let disabled: Vec<_> = self
            .components
            .list_assigned_protections(component, crate::domain::protection::ProtectionType::NONE)
            .await?
            .into_iter()
            .map(|mut assignment| {
                assignment.state = ProtectionState::Disabled;
                assignment
            })
            .collect();

        let recompute = |component: &mut Component, merged: &[AssignedProtection]| {
            component.set_public(false)?;
            component.required_passes = component.required_passes.max(1);
            self.recompute_strength(component, merged)
        };
        let updated = self
            .components
            .update_protections(component, &disabled, &[], &recompute)
            .await?;
        warn!(component_id = %updated.id, "Component locked down");
        self.publish_changed(&updated);
        Ok(updated)
    }

    pub async fn enable_feature(&self, id: ComponentId, feature: Feature) -> Result<Component, ComponentServiceError> {
        let mut component = self.get(id).await?;
        component.enable_feature(feature)?;
        self.components.save(&component).await?;
        Ok(component)
    }

    /// Soft-delete a component. Components without contents are removed
    /// right away; login gates cannot be deleted.
    pub async fn request_deletion(&self, id: ComponentId) -> Result<DeletionOutcome, ComponentServiceError> {
        let mut component = self.get(id).await?;
        if component.is_reserved() {
            return Err(ComponentError::ReservedName(component.name).into());
        }

        if self.contents.list_by_component(id).await?.is_empty() {
            self.components.delete(id).await?;
            info!(component_id = %id, "Deleted empty component");
            self.event_bus.publish(ComponentEvent::Deleted {
                component_id: id,
                deleted_at: Utc::now(),
            });
            return Ok(DeletionOutcome::Deleted);
        }

        let now = Utc::now();
        component.request_deletion(now);
        self.components.save(&component).await?;
        let requested_at = component.deletion_requested.unwrap_or(now);
        self.event_bus.publish(ComponentEvent::DeletionRequested {
            component_id: id,
            requested_at,
        });
        Ok(DeletionOutcome::Scheduled(requested_at))
    }

    /// Hard-delete everything whose grace period has elapsed, contents
    /// before components. Individual failures are logged and counted.
    pub async fn purge_due(&self, now: DateTime<Utc>) -> Result<PurgeReport, ComponentServiceError> {
        let mut report = PurgeReport::default();

        for content in self.contents.list_deletion_requested().await? {
            if !content.deletion_due(now, self.deletion.content_grace) {
                continue;
            }
            match self.contents.delete(content.id).await {
                Ok(()) => {
                    report.contents += 1;
                    self.event_bus.publish(ComponentEvent::ContentDeleted {
                        content_id: content.id,
                        deleted_at: now,
                    });
                }
                Err(e) => {
                    error!(content_id = %content.id, error = %e, "Failed to purge content");
                    report.failures += 1;
                }
            }
        }

        for component in self.components.list_deletion_requested().await? {
            if !component.deletion_due(now, self.deletion.component_grace) {
                continue;
            }
            match self.components.delete(component.id).await {
                Ok(()) => {
                    report.components += 1;
                    self.event_bus.publish(ComponentEvent::Deleted {
                        component_id: component.id,
                        deleted_at: now,
                    });
                }
                Err(e) => {
                    error!(component_id = %component.id, error = %e, "Failed to purge component");
                    report.failures += 1;
                }
            }
        }

        info!(
            contents = report.contents,
            components = report.components,
            failures = report.failures,
            "Purge sweep finished"
        );
        Ok(report)
    }

    fn publish_changed(&self, component: &Component) {
        self.event_bus.publish(ComponentEvent::ProtectionsChanged {
            component_id: component.id,
            strength: component.strength(),
            changed_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::platform_config::PlatformConfigSpec;
    use crate::domain::protection::ProtectionType;
    use crate::infrastructure::protections::{builtin_catalog, PasswordProtection};
    use crate::infrastructure::repositories::InMemoryStore;
    use serde_json::json;

    fn service(store: &InMemoryStore) -> ComponentService {
        let spec = PlatformConfigSpec::default();
        let catalog = builtin_catalog(&spec, "test-secret").unwrap();
        ComponentService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(catalog),
            Arc::new(EventBus::default()),
            spec.security.min_login_strength,
            spec.security.default_token_ttl,
            spec.deletion.clone(),
        )
    }

    fn password(component: ComponentId) -> AssignedProtection {
        let mut assignment =
            AssignedProtection::new(component, ProtectionCode::new("password"), ProtectionState::Enabled);
        assignment.data = PasswordProtection::new("test-secret").config_from_clear(&[], &["hunter2"], false);
        assignment
    }

    #[tokio::test]
    async fn test_signup_creates_login_gates() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let user = service.signup("alice").await.unwrap();

        let index = service.get_by_name(user.id, INDEX_NAME).await.unwrap();
        let fake = service.get_by_name(user.id, FAKE_INDEX_NAME).await.unwrap();
        assert_eq!(index.strength(), 10);
        assert_eq!(index.required_passes, 1);
        assert!(fake.is_fake_index());

        let err = service.signup("alice").await.unwrap_err();
        assert!(matches!(err, ComponentServiceError::UserExists(_)));
    }

    #[tokio::test]
    async fn test_update_protections_recomputes_strength() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let user = service.signup("bob").await.unwrap();
        let component = service.create_component(user.id, "home").await.unwrap();

        let updated = service.set_required_passes(component.id, 1).await.unwrap();
        assert_eq!(updated.strength(), 9);
        assert!(!updated.can_auth());

        let updated = service
            .update_protections(component.id, vec![password(component.id)], vec![])
            .await
            .unwrap();
        let assigned = store
            .list_assigned_protections(component.id, ProtectionType::NONE)
            .await
            .unwrap();
        assert_eq!(assigned.len(), 1);
        assert!(updated.can_auth());
        assert_eq!(updated.strength(), 8);
    }

    #[tokio::test]
    async fn test_login_gate_below_minimum_is_rejected() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let user = service.signup("carol").await.unwrap();
        let index = service.get_by_name(user.id, INDEX_NAME).await.unwrap();

        let allow = AssignedProtection::new(index.id, ProtectionCode::new("allow"), ProtectionState::Enabled);
        let err = service
            .update_protections(index.id, vec![allow], vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ComponentServiceError::Component(_)));
        let assigned = store
            .list_assigned_protections(index.id, ProtectionType::NONE)
            .await
            .unwrap();
        assert!(assigned.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_kind_and_bad_config_are_rejected() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let user = service.signup("dave").await.unwrap();
        let component = service.create_component(user.id, "notes").await.unwrap();

        let unknown = AssignedProtection::new(component.id, ProtectionCode::new("nope"), ProtectionState::Enabled);
        let err = service
            .update_protections(component.id, vec![unknown], vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ComponentServiceError::Catalog(_)));

        let bad = AssignedProtection::new(component.id, ProtectionCode::new("randomfail"), ProtectionState::Enabled)
            .with_data(json!({"fail_percent": 250}));
        let err = service
            .update_protections(component.id, vec![bad], vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ComponentServiceError::Protection(_)));
    }

    #[tokio::test]
    async fn test_lockdown_disables_everything() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let user = service.signup("erin").await.unwrap();
        let component = service.create_component(user.id, "diary").await.unwrap();
        service
            .update_protections(component.id, vec![password(component.id)], vec![])
            .await
            .unwrap();
        service.set_public(component.id, true).await.unwrap();

        let locked = service.lockdown(component.id).await.unwrap();
        assert!(!locked.public);
        assert!(locked.required_passes >= 1);
        let assigned = store
            .list_assigned_protections(component.id, ProtectionType::NONE)
            .await
            .unwrap();
        assert!(assigned.iter().all(|a| a.state == ProtectionState::Disabled));
    }

    #[tokio::test]
    async fn test_deletion_of_empty_component_is_immediate() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let user = service.signup("frank").await.unwrap();
        let component = service.create_component(user.id, "scratch").await.unwrap();

        let outcome = service.request_deletion(component.id).await.unwrap();
        assert_eq!(outcome, DeletionOutcome::Deleted);
        assert!(matches!(
            service.get(component.id).await,
            Err(ComponentServiceError::NotFound)
        ));

        let index = service.get_by_name(user.id, INDEX_NAME).await.unwrap();
        assert!(service.request_deletion(index.id).await.is_err());
    }
}
