// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository traits defined in
//! `crate::domain::repository`.
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! - **PostgresComponentRepository** - components, assigned protections, kind table
//! - **PostgresContentRepository** - content items and their info maps
//! - **PostgresTokenRepository** - capability tokens (unique token strings)
//! - **PostgresTravelRepository** - travel overlays and the shield join table
//! - **PostgresUserRepository** - accounts, cascading to everything owned
//!
//! ## In-Memory Store
//!
//! - **InMemoryStore** - one lock-guarded state implementing every trait
//!
//! # Design Principles
//!
//! 1. **Explicit deletion order**: contents before components, shield links
//!    removed explicitly rather than through polymorphic foreign keys
//! 2. **Transactional recomputation**: assignment changes and the derived
//!    component strength are written in one transaction
//! 3. **Error Mapping**: unique violations surface as `RepositoryError::Conflict`

pub mod memory;
pub mod postgres_component;
pub mod postgres_content;
pub mod postgres_token;
pub mod postgres_travel;
pub mod postgres_user;

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;

pub use memory::InMemoryStore;
pub use postgres_component::PostgresComponentRepository;
pub use postgres_content::PostgresContentRepository;
pub use postgres_token::PostgresTokenRepository;
pub use postgres_travel::PostgresTravelRepository;
pub use postgres_user::PostgresUserRepository;

use crate::domain::protection::{AssignedProtection, ProtectionCode};
use crate::domain::repository::{
    ComponentRepository, ContentRepository, ProtectionKindStore, TokenRepository, TravelRepository,
    UserRepository,
};

/// Every repository of one storage backend.
#[derive(Clone)]
pub struct Repositories {
    pub components: Arc<dyn ComponentRepository>,
    pub contents: Arc<dyn ContentRepository>,
    pub tokens: Arc<dyn TokenRepository>,
    pub travel: Arc<dyn TravelRepository>,
    pub users: Arc<dyn UserRepository>,
    pub kinds: Arc<dyn ProtectionKindStore>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            components: store.clone(),
            contents: store.clone(),
            tokens: store.clone(),
            travel: store.clone(),
            users: store.clone(),
            kinds: store,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        let components = Arc::new(PostgresComponentRepository::new(pool.clone()));
        Self {
            components: components.clone(),
            contents: Arc::new(PostgresContentRepository::new(pool.clone())),
            tokens: Arc::new(PostgresTokenRepository::new(pool.clone())),
            travel: Arc::new(PostgresTravelRepository::new(pool.clone())),
            users: Arc::new(PostgresUserRepository::new(pool)),
            kinds: components,
        }
    }
}

/// Apply removals then upserts to an assignment set, ordered by code.
///
/// An upsert for an already assigned code keeps the existing id, creation
/// time and audit log.
pub(crate) fn merge_assignments(
    current: Vec<AssignedProtection>,
    upserts: &[AssignedProtection],
    removals: &[ProtectionCode],
) -> Vec<AssignedProtection> {
    let mut merged: Vec<AssignedProtection> = current
        .into_iter()
        .filter(|a| !removals.contains(&a.code))
        .collect();
    let now = Utc::now();
    for upsert in upserts {
        let mut next = upsert.clone();
        next.modified = now;
        match merged.iter_mut().find(|a| a.code == upsert.code) {
            Some(existing) => {
                next.id = existing.id;
                next.created = existing.created;
                next.audit_log = std::mem::take(&mut existing.audit_log);
                *existing = next;
            }
            None => merged.push(next),
        }
    }
    merged.sort_by(|a, b| a.code.cmp(&b.code));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::component::ComponentId;
    use crate::domain::protection::{AuditEntry, ProtectionState};

    #[test]
    fn test_merge_keeps_identity_and_audit() {
        let component = ComponentId::new();
        let mut password = AssignedProtection::new(component, "password".into(), ProtectionState::Enabled);
        password.audit_log.push(AuditEntry {
            at: Utc::now(),
            client_ip: None,
            success: false,
            note: String::new(),
        });
        let allow = AssignedProtection::new(component, "allow".into(), ProtectionState::Enabled);

        let replacement = AssignedProtection::new(component, "password".into(), ProtectionState::InstantFail);
        let friends = AssignedProtection::new(component, "friends".into(), ProtectionState::Enabled);
        let merged = merge_assignments(
            vec![password.clone(), allow],
            &[replacement, friends],
            &["allow".into()],
        );

        let codes: Vec<_> = merged.iter().map(|a| a.code.as_str()).collect();
        assert_eq!(codes, ["friends", "password"]);
        assert_eq!(merged[1].id, password.id);
        assert_eq!(merged[1].state, ProtectionState::InstantFail);
        assert_eq!(merged[1].audit_log.len(), 1);
    }
}
