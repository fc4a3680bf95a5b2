// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! In-memory storage backend
//!
//! One store implements every repository trait so that cascades (component →
//! contents → tokens → overlays) run under a single lock, mirroring the
//! transactional behaviour of the PostgreSQL backend. Used for tests and for
//! deployments without `spec.database.url`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::component::{Component, ComponentId};
use crate::domain::content::{Content, ContentId};
use crate::domain::protection::{AssignedProtection, AssignmentId, AuditEntry, ProtectionCode, ProtectionType};
use crate::domain::repository::{
    ComponentRepository, ContentRepository, KindRecord, ProtectionKindStore, ProtectionUpdateError,
    RepositoryError, StrengthRecompute, TokenQuery, TokenRepository, TravelRepository, UserRepository,
};
use crate::domain::token::{CapabilityToken, Persist, TokenId};
use crate::domain::travel::{ShieldTarget, TravelProtection};
use crate::domain::user::{User, UserId};

use super::merge_assignments;

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, User>,
    components: HashMap<ComponentId, Component>,
    assignments: HashMap<ComponentId, BTreeMap<ProtectionCode, AssignedProtection>>,
    contents: HashMap<ContentId, Content>,
    tokens: HashMap<TokenId, CapabilityToken>,
    token_strings: HashMap<String, TokenId>,
    overlays: HashMap<ContentId, TravelProtection>,
    kinds: BTreeMap<ProtectionCode, KindRecord>,
}

impl State {
    fn kind_matches(&self, code: &ProtectionCode, ptype: ProtectionType) -> bool {
        // kinds unknown to the store are left for the engine to filter
        self.kinds
            .get(code)
            .is_none_or(|record| record.ptype.contains(ptype))
    }

    fn remove_token(&mut self, id: TokenId) {
        if let Some(token) = self.tokens.remove(&id) {
            self.token_strings.remove(&token.token);
        }
    }

    fn remove_tokens_where(&mut self, predicate: impl Fn(&CapabilityToken) -> bool) {
        let doomed: Vec<TokenId> = self
            .tokens
            .values()
            .filter(|token| predicate(token))
            .map(|token| token.id)
            .collect();
        for id in doomed {
            self.remove_token(id);
        }
    }

    fn unlink_target(&mut self, target: ShieldTarget) {
        for overlay in self.overlays.values_mut() {
            overlay.shields.remove(&target);
        }
    }

    fn delete_content(&mut self, id: ContentId) {
        if self.contents.remove(&id).is_none() {
            return;
        }
        self.remove_tokens_where(|t| t.content_id == Some(id) || t.persist == Persist::Anchored(id));
        self.overlays.remove(&id);
        self.unlink_target(ShieldTarget::Content(id));
    }

    fn delete_component(&mut self, id: ComponentId) {
        let contents: Vec<ContentId> = self
            .contents
            .values()
            .filter(|c| c.component_id == id)
            .map(|c| c.id)
            .collect();
        for content in contents {
            self.delete_content(content);
        }
        self.remove_tokens_where(|t| t.component_id == id);
        self.assignments.remove(&id);
        self.overlays.retain(|_, overlay| overlay.component_id != id);
        self.components.remove(&id);
        self.unlink_target(ShieldTarget::Component(id));
    }

    fn check_token_unique(&self, token: &CapabilityToken) -> Result<(), RepositoryError> {
        match self.token_strings.get(&token.token) {
            Some(existing) if *existing != token.id => Err(RepositoryError::Conflict(
                "token string already in use".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn store_token(&mut self, token: &CapabilityToken) {
        if let Some(previous) = self.tokens.insert(token.id, token.clone()) {
            self.token_strings.remove(&previous.token);
        }
        self.token_strings.insert(token.token.clone(), token.id);
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ComponentRepository for InMemoryStore {
    async fn find_by_id(&self, id: ComponentId) -> Result<Option<Component>, RepositoryError> {
        Ok(self.state.read().components.get(&id).cloned())
    }

    async fn find_component(&self, owner: UserId, name: &str) -> Result<Option<Component>, RepositoryError> {
        Ok(self
            .state
            .read()
            .components
            .values()
            .find(|c| c.owner == owner && c.name == name)
            .cloned())
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Component>, RepositoryError> {
        let state = self.state.read();
        let mut components: Vec<Component> = state
            .components
            .values()
            .filter(|c| c.owner == owner)
            .cloned()
            .collect();
        components.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(components)
    }

    async fn save(&self, component: &Component) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        let duplicate = state
            .components
            .values()
            .any(|c| c.id != component.id && c.owner == component.owner && c.name == component.name);
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "component '{}' already exists",
                component.name
            )));
        }
        state.components.insert(component.id, component.clone());
        Ok(())
    }

    async fn save_with_protections(
        &self,
        component: &Component,
        protections: &[AssignedProtection],
    ) -> Result<(), RepositoryError> {
        ComponentRepository::save(self, component).await?;
        let assignments = protections
            .iter()
            .map(|p| (p.code.clone(), p.clone()))
            .collect();
        self.state.write().assignments.insert(component.id, assignments);
        Ok(())
    }

    async fn update_protections(
        &self,
        component: ComponentId,
        upserts: &[AssignedProtection],
        removals: &[ProtectionCode],
        recompute: StrengthRecompute<'_>,
    ) -> Result<Component, ProtectionUpdateError> {
        let mut state = self.state.write();
        let mut updated = state
            .components
            .get(&component)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("component {component}")))?;
        let current: Vec<AssignedProtection> = state
            .assignments
            .get(&component)
            .map(|a| a.values().cloned().collect())
            .unwrap_or_default();
        let merged = merge_assignments(current, upserts, removals);
        recompute(&mut updated, &merged)?;
        state.components.insert(component, updated.clone());
        state
            .assignments
            .insert(component, merged.into_iter().map(|a| (a.code.clone(), a)).collect());
        Ok(updated)
    }

    async fn list_assigned_protections(
        &self,
        component: ComponentId,
        ptype: ProtectionType,
    ) -> Result<Vec<AssignedProtection>, RepositoryError> {
        let state = self.state.read();
        Ok(state
            .assignments
            .get(&component)
            .map(|assignments| {
                assignments
                    .values()
                    .filter(|a| state.kind_matches(&a.code, ptype))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn save_assigned_protection(&self, protection: &AssignedProtection) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        if !state.components.contains_key(&protection.component_id) {
            return Err(RepositoryError::NotFound(format!("component {}", protection.component_id)));
        }
        let assignments = state.assignments.entry(protection.component_id).or_default();
        let duplicate = assignments
            .get(&protection.code)
            .is_some_and(|existing| existing.id != protection.id);
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "protection '{}' already assigned",
                protection.code
            )));
        }
        assignments.insert(protection.code.clone(), protection.clone());
        Ok(())
    }

    async fn append_audit(&self, id: AssignmentId, entries: &[AuditEntry]) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        let assignment = state
            .assignments
            .values_mut()
            .flat_map(|assignments| assignments.values_mut())
            .find(|a| a.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("assignment {id}")))?;
        assignment.audit_log.extend_from_slice(entries);
        Ok(())
    }

    async fn delete(&self, id: ComponentId) -> Result<(), RepositoryError> {
        self.state.write().delete_component(id);
        Ok(())
    }

    async fn list_deletion_requested(&self) -> Result<Vec<Component>, RepositoryError> {
        Ok(self
            .state
            .read()
            .components
            .values()
            .filter(|c| c.deletion_requested.is_some())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ContentRepository for InMemoryStore {
    async fn find_by_id(&self, id: ContentId) -> Result<Option<Content>, RepositoryError> {
        Ok(self.state.read().contents.get(&id).cloned())
    }

    async fn find_content(&self, component: ComponentId, id: ContentId) -> Result<Option<Content>, RepositoryError> {
        Ok(self
            .state
            .read()
            .contents
            .get(&id)
            .filter(|c| c.component_id == component)
            .cloned())
    }

    async fn list_by_component(&self, component: ComponentId) -> Result<Vec<Content>, RepositoryError> {
        let state = self.state.read();
        let mut contents: Vec<Content> = state
            .contents
            .values()
            .filter(|c| c.component_id == component)
            .cloned()
            .collect();
        contents.sort_by_key(|c| c.created);
        Ok(contents)
    }

    async fn save(&self, content: &Content) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        if !state.components.contains_key(&content.component_id) {
            return Err(RepositoryError::NotFound(format!("component {}", content.component_id)));
        }
        state.contents.insert(content.id, content.clone());
        Ok(())
    }

    async fn delete(&self, id: ContentId) -> Result<(), RepositoryError> {
        self.state.write().delete_content(id);
        Ok(())
    }

    async fn list_deletion_requested(&self) -> Result<Vec<Content>, RepositoryError> {
        Ok(self
            .state
            .read()
            .contents
            .values()
            .filter(|c| c.deletion_requested.is_some())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TokenRepository for InMemoryStore {
    async fn insert(&self, token: &CapabilityToken) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        if state.token_strings.contains_key(&token.token) || state.tokens.contains_key(&token.id) {
            return Err(RepositoryError::Conflict("token string already in use".to_string()));
        }
        state.store_token(token);
        Ok(())
    }

    async fn update(&self, token: &CapabilityToken) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        if !state.tokens.contains_key(&token.id) {
            return Err(RepositoryError::NotFound(format!("token {}", token.id.0)));
        }
        state.check_token_unique(token)?;
        state.store_token(token);
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<CapabilityToken>, RepositoryError> {
        let state = self.state.read();
        Ok(state
            .token_strings
            .get(token)
            .and_then(|id| state.tokens.get(id))
            .cloned())
    }

    async fn find_persistent(
        &self,
        component: ComponentId,
        referrer: &str,
    ) -> Result<Option<CapabilityToken>, RepositoryError> {
        Ok(self
            .state
            .read()
            .tokens
            .values()
            .find(|t| {
                t.component_id == component
                    && t.persist.is_persistent()
                    && t.referrer.as_deref() == Some(referrer)
            })
            .cloned())
    }

    async fn delete(&self, id: TokenId) -> Result<(), RepositoryError> {
        self.state.write().remove_token(id);
        Ok(())
    }

    async fn list(&self, filter: &TokenQuery) -> Result<Vec<CapabilityToken>, RepositoryError> {
        let state = self.state.read();
        let mut tokens: Vec<CapabilityToken> = state
            .tokens
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.created);
        if let Some(oldest) = filter.oldest {
            tokens.truncate(oldest);
        }
        Ok(tokens)
    }

    async fn delete_matching(&self, filter: &TokenQuery) -> Result<u64, RepositoryError> {
        let doomed = self.list(filter).await?;
        let mut state = self.state.write();
        for token in &doomed {
            state.remove_token(token.id);
        }
        Ok(doomed.len() as u64)
    }
}

#[async_trait]
impl TravelRepository for InMemoryStore {
    async fn find_by_id(&self, id: ContentId) -> Result<Option<TravelProtection>, RepositoryError> {
        Ok(self.state.read().overlays.get(&id).cloned())
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<TravelProtection>, RepositoryError> {
        let state = self.state.read();
        let mut overlays: Vec<TravelProtection> = state
            .overlays
            .values()
            .filter(|o| o.owner == owner)
            .cloned()
            .collect();
        overlays.sort_by_key(|o| o.id);
        Ok(overlays)
    }

    async fn save(&self, overlay: &TravelProtection) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        if !state.contents.contains_key(&overlay.id) {
            return Err(RepositoryError::NotFound(format!("content {}", overlay.id)));
        }
        state.overlays.insert(overlay.id, overlay.clone());
        Ok(())
    }

    async fn delete(&self, id: ContentId) -> Result<(), RepositoryError> {
        self.state.write().overlays.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.state.read().users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .state
            .read()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn save(&self, user: &User) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        let taken = state
            .users
            .values()
            .any(|u| u.id != user.id && u.username == user.username);
        if taken {
            return Err(RepositoryError::Conflict(format!("username '{}' taken", user.username)));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn delete(&self, id: UserId) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        let components: Vec<ComponentId> = state
            .components
            .values()
            .filter(|c| c.owner == id)
            .map(|c| c.id)
            .collect();
        for component in components {
            state.delete_component(component);
        }
        state.overlays.retain(|_, overlay| overlay.owner != id);
        state.users.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl ProtectionKindStore for InMemoryStore {
    async fn list_kinds(&self) -> Result<Vec<KindRecord>, RepositoryError> {
        Ok(self.state.read().kinds.values().cloned().collect())
    }

    async fn upsert_kind(&self, record: &KindRecord) -> Result<(), RepositoryError> {
        self.state.write().kinds.insert(record.code.clone(), record.clone());
        Ok(())
    }
}
