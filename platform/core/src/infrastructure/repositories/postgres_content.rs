// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Content Repository
//!
//! The structured info map is stored in its legacy delimited form in the
//! `contents.info` column and parsed back on load.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::component::ComponentId;
use crate::domain::content::{Content, ContentId};
use crate::domain::info::InfoMap;
use crate::domain::repository::{ContentRepository, RepositoryError};
use crate::domain::token::TokenId;

const CONTENT_COLUMNS: &str = "id, component_id, content_type, name, description, strength, info, \
     persist_token, created, modified, deletion_requested";

pub struct PostgresContentRepository {
    pool: PgPool,
}

impl PostgresContentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn content_from_row(row: &PgRow) -> Result<Content, RepositoryError> {
    let info: String = row.try_get("info")?;
    let info = InfoMap::parse(&info).map_err(|e| RepositoryError::Serialization(e.to_string()))?;
    let strength: i16 = row.try_get("strength")?;
    let persist_token: Option<Uuid> = row.try_get("persist_token")?;
    Ok(Content {
        id: ContentId(row.try_get("id")?),
        component_id: ComponentId(row.try_get("component_id")?),
        content_type: row.try_get("content_type")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        strength: u8::try_from(strength).unwrap_or(0),
        info,
        persist_token: persist_token.map(TokenId),
        created: row.try_get("created")?,
        modified: row.try_get("modified")?,
        deletion_requested: row.try_get("deletion_requested")?,
    })
}

#[async_trait]
impl ContentRepository for PostgresContentRepository {
    async fn find_by_id(&self, id: ContentId) -> Result<Option<Content>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {CONTENT_COLUMNS} FROM contents WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(content_from_row).transpose()
    }

    async fn find_content(&self, component: ComponentId, id: ContentId) -> Result<Option<Content>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents WHERE id = $1 AND component_id = $2"
        ))
        .bind(id.0)
        .bind(component.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(content_from_row).transpose()
    }

    async fn list_by_component(&self, component: ComponentId) -> Result<Vec<Content>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents WHERE component_id = $1 ORDER BY created ASC"
        ))
        .bind(component.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(content_from_row).collect()
    }

    async fn save(&self, content: &Content) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO contents (
                id, component_id, content_type, name, description, strength, info,
                persist_token, created, modified, deletion_requested
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                strength = EXCLUDED.strength,
                info = EXCLUDED.info,
                persist_token = EXCLUDED.persist_token,
                modified = EXCLUDED.modified,
                deletion_requested = EXCLUDED.deletion_requested
            "#,
        )
        .bind(content.id.0)
        .bind(content.component_id.0)
        .bind(&content.content_type)
        .bind(&content.name)
        .bind(&content.description)
        .bind(i16::from(content.strength))
        .bind(content.info.to_legacy_string())
        .bind(content.persist_token.map(|t| t.0))
        .bind(content.created)
        .bind(content.modified)
        .bind(content.deletion_requested)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: ContentId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM travel_shields WHERE target_kind = 'content' AND target_id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tokens WHERE content_id = $1 OR persist_anchor = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM contents WHERE id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_deletion_requested(&self) -> Result<Vec<Content>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents WHERE deletion_requested IS NOT NULL"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(content_from_row).collect()
    }
}
