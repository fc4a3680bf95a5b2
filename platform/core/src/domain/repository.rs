// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate, defined in the domain layer and
//! implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `ComponentRepository` | `Component` + `AssignedProtection` | `InMemoryStore`, `PostgresComponentRepository` |
//! | `ContentRepository` | `Content` | `InMemoryStore`, `PostgresContentRepository` |
//! | `TokenRepository` | `CapabilityToken` | `InMemoryStore`, `PostgresTokenRepository` |
//! | `TravelRepository` | `TravelProtection` | `InMemoryStore`, `PostgresTravelRepository` |
//! | `UserRepository` | `User` | `InMemoryStore`, `PostgresUserRepository` |
//! | `ProtectionKindStore` | persisted kind table | `InMemoryStore`, `PostgresComponentRepository` |
//!
//! "Not found" is reported as `Ok(None)` by lookups and never conflated with
//! permission errors; the application layer decides when to collapse both.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::component::{Component, ComponentError, ComponentId};
use crate::domain::content::{Content, ContentId};
use crate::domain::protection::{AssignedProtection, AssignmentId, AuditEntry, ProtectionCode, ProtectionType};
use crate::domain::token::{AnchorFilter, CapabilityToken, TokenId};
use crate::domain::travel::TravelProtection;
use crate::domain::user::{User, UserId};

/// Storage backend selected at startup
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

/// Callback recomputing a component's derived strength from its assignments.
pub type StrengthRecompute<'a> =
    &'a (dyn Fn(&mut Component, &[AssignedProtection]) -> Result<(), ComponentError> + Send + Sync);

#[derive(Debug, thiserror::Error)]
pub enum ProtectionUpdateError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Rejected(#[from] ComponentError),
}

/// Persisted record of a known protection kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindRecord {
    pub code: ProtectionCode,
    pub ptype: ProtectionType,
}

#[async_trait]
pub trait ComponentRepository: Send + Sync {
    async fn find_by_id(&self, id: ComponentId) -> Result<Option<Component>, RepositoryError>;

    async fn find_component(&self, owner: UserId, name: &str) -> Result<Option<Component>, RepositoryError>;

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Component>, RepositoryError>;

    /// Save component fields only.
    async fn save(&self, component: &Component) -> Result<(), RepositoryError>;

    /// Save a component together with its full assignment set in one
    /// transaction (existing assignments are replaced).
    async fn save_with_protections(
        &self,
        component: &Component,
        protections: &[AssignedProtection],
    ) -> Result<(), RepositoryError>;

    /// Read the current assignment set, apply `upserts` and `removals`, let
    /// `recompute` update the component's derived fields from the merged set
    /// and write everything back, all inside one transaction. An error from
    /// `recompute` rolls the transaction back.
    async fn update_protections(
        &self,
        component: ComponentId,
        upserts: &[AssignedProtection],
        removals: &[ProtectionCode],
        recompute: StrengthRecompute<'_>,
    ) -> Result<Component, ProtectionUpdateError>;

    /// Assignments of a component whose kind matches `ptype`
    /// (`ProtectionType::NONE` matches all), ordered by code.
    async fn list_assigned_protections(
        &self,
        component: ComponentId,
        ptype: ProtectionType,
    ) -> Result<Vec<AssignedProtection>, RepositoryError>;

    async fn save_assigned_protection(&self, protection: &AssignedProtection) -> Result<(), RepositoryError>;

    /// Append audit entries to an assignment's log.
    async fn append_audit(&self, id: AssignmentId, entries: &[AuditEntry]) -> Result<(), RepositoryError>;

    /// Hard delete; assignments and tokens are removed with it.
    async fn delete(&self, id: ComponentId) -> Result<(), RepositoryError>;

    async fn list_deletion_requested(&self) -> Result<Vec<Component>, RepositoryError>;
}

#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn find_by_id(&self, id: ContentId) -> Result<Option<Content>, RepositoryError>;

    async fn find_content(&self, component: ComponentId, id: ContentId) -> Result<Option<Content>, RepositoryError>;

    async fn list_by_component(&self, component: ComponentId) -> Result<Vec<Content>, RepositoryError>;

    async fn save(&self, content: &Content) -> Result<(), RepositoryError>;

    async fn delete(&self, id: ContentId) -> Result<(), RepositoryError>;

    async fn list_deletion_requested(&self) -> Result<Vec<Content>, RepositoryError>;
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Insert a new token. A duplicate token string yields
    /// `RepositoryError::Conflict`.
    async fn insert(&self, token: &CapabilityToken) -> Result<(), RepositoryError>;

    /// Update an existing token (also its string); duplicates yield `Conflict`.
    async fn update(&self, token: &CapabilityToken) -> Result<(), RepositoryError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<CapabilityToken>, RepositoryError>;

    async fn find_persistent(
        &self,
        component: ComponentId,
        referrer: &str,
    ) -> Result<Option<CapabilityToken>, RepositoryError>;

    async fn delete(&self, id: TokenId) -> Result<(), RepositoryError>;

    async fn list(&self, filter: &TokenQuery) -> Result<Vec<CapabilityToken>, RepositoryError>;

    /// Delete every token matching the filter, returning the count.
    async fn delete_matching(&self, filter: &TokenQuery) -> Result<u64, RepositoryError>;
}

/// Selection used by bulk token maintenance.
#[derive(Debug, Clone, Default)]
pub struct TokenQuery {
    pub component: Option<ComponentId>,
    pub referrer: Option<String>,
    pub anchor: AnchorFilter,
    pub created_before: Option<DateTime<Utc>>,
    /// Only the `n` oldest matching tokens.
    pub oldest: Option<usize>,
}

impl TokenQuery {
    pub fn matches(&self, token: &CapabilityToken) -> bool {
        self.component.is_none_or(|c| token.component_id == c)
            && self
                .referrer
                .as_deref()
                .is_none_or(|r| token.referrer.as_deref() == Some(r))
            && self.anchor.matches(token.persist)
            && self.created_before.is_none_or(|cutoff| token.created < cutoff)
    }
}

#[async_trait]
pub trait TravelRepository: Send + Sync {
    async fn find_by_id(&self, id: ContentId) -> Result<Option<TravelProtection>, RepositoryError>;

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<TravelProtection>, RepositoryError>;

    /// Save the overlay and replace its shield links.
    async fn save(&self, overlay: &TravelProtection) -> Result<(), RepositoryError>;

    async fn delete(&self, id: ContentId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;

    async fn save(&self, user: &User) -> Result<(), RepositoryError>;

    /// Delete the account together with everything it owns.
    async fn delete(&self, id: UserId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProtectionKindStore: Send + Sync {
    async fn list_kinds(&self) -> Result<Vec<KindRecord>, RepositoryError>;

    async fn upsert_kind(&self, record: &KindRecord) -> Result<(), RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Postgres SQLSTATE for unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                RepositoryError::Conflict(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
