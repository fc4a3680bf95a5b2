// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Component Repository
//!
//! `ComponentRepository` and `ProtectionKindStore` backed by the
//! `components`, `assigned_protections` and `protection_kinds` tables.
//!
//! `update_protections` locks the component row (`FOR UPDATE`), reads the
//! current assignment set, recomputes the derived strength and writes both
//! back before committing, so concurrent edits cannot leave the strength
//! understated.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::component::{Component, ComponentId, Feature};
use crate::domain::content::ContentId;
use crate::domain::protection::{
    AssignedProtection, AssignmentId, AuditEntry, ProtectionCode, ProtectionConfig, ProtectionState,
    ProtectionType,
};
use crate::domain::repository::{
    ComponentRepository, KindRecord, ProtectionKindStore, ProtectionUpdateError, RepositoryError,
    StrengthRecompute,
};
use crate::domain::user::UserId;

use super::merge_assignments;

const COMPONENT_COLUMNS: &str = "id, owner_id, name, description, public, required_passes, strength, \
     can_auth, token_duration_secs, features, primary_anchor, created, modified, deletion_requested";

pub struct PostgresComponentRepository {
    pool: PgPool,
}

impl PostgresComponentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn component_from_row(row: &PgRow) -> Result<Component, RepositoryError> {
    let features: serde_json::Value = row.try_get("features")?;
    let features: BTreeSet<Feature> = serde_json::from_value(features)?;
    let required_passes: i32 = row.try_get("required_passes")?;
    let strength: i16 = row.try_get("strength")?;
    let ttl: i64 = row.try_get("token_duration_secs")?;
    let primary_anchor: Option<Uuid> = row.try_get("primary_anchor")?;
    Ok(Component::restore(
        ComponentId(row.try_get("id")?),
        UserId(row.try_get("owner_id")?),
        row.try_get("name")?,
        row.try_get("description")?,
        row.try_get("public")?,
        u32::try_from(required_passes).unwrap_or(0),
        u8::try_from(strength).unwrap_or(0),
        row.try_get("can_auth")?,
        Duration::from_secs(u64::try_from(ttl).unwrap_or(0)),
        features,
        primary_anchor.map(ContentId),
        row.try_get("created")?,
        row.try_get("modified")?,
        row.try_get("deletion_requested")?,
    ))
}

fn assignment_from_row(row: &PgRow) -> Result<AssignedProtection, RepositoryError> {
    let data: serde_json::Value = row.try_get("data")?;
    let data: ProtectionConfig = serde_json::from_value(data)?;
    let audit_log: serde_json::Value = row.try_get("audit_log")?;
    let audit_log: Vec<AuditEntry> = serde_json::from_value(audit_log)?;
    let state: String = row.try_get("state")?;
    let state = ProtectionState::parse(&state)
        .ok_or_else(|| RepositoryError::Serialization(format!("unknown protection state '{state}'")))?;
    let code: String = row.try_get("code")?;
    Ok(AssignedProtection {
        id: AssignmentId(row.try_get("id")?),
        component_id: ComponentId(row.try_get("component_id")?),
        code: ProtectionCode(code),
        data,
        state,
        audit_log,
        created: row.try_get("created")?,
        modified: row.try_get("modified")?,
    })
}

async fn upsert_component(
    tx: &mut Transaction<'_, Postgres>,
    component: &Component,
) -> Result<(), RepositoryError> {
    let features = serde_json::to_value(&component.features)?;
    sqlx::query(
        r#"
        INSERT INTO components (
            id, owner_id, name, description, public, required_passes, strength,
            can_auth, token_duration_secs, features, primary_anchor,
            created, modified, deletion_requested
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (id) DO UPDATE SET
            name = EXCLUDED.name,
            description = EXCLUDED.description,
            public = EXCLUDED.public,
            required_passes = EXCLUDED.required_passes,
            strength = EXCLUDED.strength,
            can_auth = EXCLUDED.can_auth,
            token_duration_secs = EXCLUDED.token_duration_secs,
            features = EXCLUDED.features,
            primary_anchor = EXCLUDED.primary_anchor,
            modified = EXCLUDED.modified,
            deletion_requested = EXCLUDED.deletion_requested
        "#,
    )
    .bind(component.id.0)
    .bind(component.owner.0)
    .bind(&component.name)
    .bind(&component.description)
    .bind(component.public)
    .bind(i32::try_from(component.required_passes).unwrap_or(i32::MAX))
    .bind(i16::from(component.strength()))
    .bind(component.can_auth())
    .bind(i64::try_from(component.token_duration.as_secs()).unwrap_or(i64::MAX))
    .bind(features)
    .bind(component.primary_anchor.map(|a| a.0))
    .bind(component.created)
    .bind(component.modified)
    .bind(component.deletion_requested)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn replace_assignments(
    tx: &mut Transaction<'_, Postgres>,
    component: ComponentId,
    assignments: &[AssignedProtection],
) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM assigned_protections WHERE component_id = $1")
        .bind(component.0)
        .execute(&mut **tx)
        .await?;
    for assignment in assignments {
        insert_assignment(tx, assignment).await?;
    }
    Ok(())
}

async fn insert_assignment(
    tx: &mut Transaction<'_, Postgres>,
    assignment: &AssignedProtection,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO assigned_protections (id, component_id, code, data, state, audit_log, created, modified)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO UPDATE SET
            data = EXCLUDED.data,
            state = EXCLUDED.state,
            audit_log = EXCLUDED.audit_log,
            modified = EXCLUDED.modified
        "#,
    )
    .bind(assignment.id.0)
    .bind(assignment.component_id.0)
    .bind(assignment.code.as_str())
    .bind(serde_json::Value::Object(assignment.data.clone()))
    .bind(assignment.state.as_str())
    .bind(serde_json::to_value(&assignment.audit_log)?)
    .bind(assignment.created)
    .bind(assignment.modified)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Remove a component and everything hanging off it, contents first.
pub(crate) async fn delete_component_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: ComponentId,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        DELETE FROM travel_shields
        WHERE target_id = $1
           OR target_id IN (SELECT id FROM contents WHERE component_id = $1)
        "#,
    )
    .bind(id.0)
    .execute(&mut **tx)
    .await?;
    sqlx::query("DELETE FROM tokens WHERE component_id = $1")
        .bind(id.0)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM contents WHERE component_id = $1")
        .bind(id.0)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM components WHERE id = $1")
        .bind(id.0)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl ComponentRepository for PostgresComponentRepository {
    async fn find_by_id(&self, id: ComponentId) -> Result<Option<Component>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COMPONENT_COLUMNS} FROM components WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(component_from_row).transpose()
    }

    async fn find_component(&self, owner: UserId, name: &str) -> Result<Option<Component>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {COMPONENT_COLUMNS} FROM components WHERE owner_id = $1 AND name = $2"
        ))
        .bind(owner.0)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(component_from_row).transpose()
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Component>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COMPONENT_COLUMNS} FROM components WHERE owner_id = $1 ORDER BY name ASC"
        ))
        .bind(owner.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(component_from_row).collect()
    }

    async fn save(&self, component: &Component) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        upsert_component(&mut tx, component).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_with_protections(
        &self,
        component: &Component,
        protections: &[AssignedProtection],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        upsert_component(&mut tx, component).await?;
        replace_assignments(&mut tx, component.id, protections).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_protections(
        &self,
        component: ComponentId,
        upserts: &[AssignedProtection],
        removals: &[ProtectionCode],
        recompute: StrengthRecompute<'_>,
    ) -> Result<Component, ProtectionUpdateError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let row = sqlx::query(&format!(
            "SELECT {COMPONENT_COLUMNS} FROM components WHERE id = $1 FOR UPDATE"
        ))
        .bind(component.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(RepositoryError::from)?
        .ok_or_else(|| RepositoryError::NotFound(format!("component {component}")))?;
        let mut updated = component_from_row(&row)?;

        let rows = sqlx::query(
            "SELECT id, component_id, code, data, state, audit_log, created, modified \
             FROM assigned_protections WHERE component_id = $1 ORDER BY code",
        )
        .bind(component.0)
        .fetch_all(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;
        let current = rows
            .iter()
            .map(assignment_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let merged = merge_assignments(current, upserts, removals);
        // dropping the transaction on error rolls it back
        recompute(&mut updated, &merged)?;

        replace_assignments(&mut tx, component, &merged).await?;
        upsert_component(&mut tx, &updated).await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(updated)
    }

    async fn list_assigned_protections(
        &self,
        component: ComponentId,
        ptype: ProtectionType,
    ) -> Result<Vec<AssignedProtection>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.component_id, a.code, a.data, a.state, a.audit_log, a.created, a.modified,
                   k.ptype AS kind_ptype
            FROM assigned_protections a
            LEFT JOIN protection_kinds k ON k.code = a.code
            WHERE a.component_id = $1
            ORDER BY a.code ASC
            "#,
        )
        .bind(component.0)
        .fetch_all(&self.pool)
        .await?;

        let mut assignments = Vec::with_capacity(rows.len());
        for row in &rows {
            let kind_ptype: Option<String> = row.try_get("kind_ptype")?;
            let matches = kind_ptype
                .as_deref()
                .is_none_or(|letters| ProtectionType::from_letters(letters).contains(ptype));
            if matches {
                assignments.push(assignment_from_row(row)?);
            }
        }
        Ok(assignments)
    }

    async fn save_assigned_protection(&self, protection: &AssignedProtection) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        insert_assignment(&mut tx, protection).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn append_audit(&self, id: AssignmentId, entries: &[AuditEntry]) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE assigned_protections SET audit_log = audit_log || $2::jsonb WHERE id = $1",
        )
        .bind(id.0)
        .bind(serde_json::to_value(entries)?)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("assignment {id}")));
        }
        Ok(())
    }

    async fn delete(&self, id: ComponentId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        delete_component_tx(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_deletion_requested(&self) -> Result<Vec<Component>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COMPONENT_COLUMNS} FROM components WHERE deletion_requested IS NOT NULL"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(component_from_row).collect()
    }
}

#[async_trait]
impl ProtectionKindStore for PostgresComponentRepository {
    async fn list_kinds(&self) -> Result<Vec<KindRecord>, RepositoryError> {
        let rows = sqlx::query("SELECT code, ptype FROM protection_kinds ORDER BY code")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let code: String = row.try_get("code")?;
                let ptype: String = row.try_get("ptype")?;
                Ok(KindRecord {
                    code: ProtectionCode(code),
                    ptype: ProtectionType::from_letters(&ptype),
                })
            })
            .collect()
    }

    async fn upsert_kind(&self, record: &KindRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO protection_kinds (code, ptype) VALUES ($1, $2) \
             ON CONFLICT (code) DO UPDATE SET ptype = EXCLUDED.ptype",
        )
        .bind(record.code.as_str())
        .bind(record.ptype.to_letters())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

