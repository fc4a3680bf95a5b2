// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Token Repository
//!
//! The unique index on `tokens.token` is the collision check of the
//! insert-with-retry issuance loop; a violation surfaces as
//! `RepositoryError::Conflict`.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::component::ComponentId;
use crate::domain::content::ContentId;
use crate::domain::repository::{RepositoryError, TokenQuery, TokenRepository};
use crate::domain::token::{CapabilityToken, Persist, TokenExtra, TokenId};

const TOKEN_COLUMNS: &str =
    "id, token, component_id, content_id, referrer, session_key, persist, extra, created";

pub struct PostgresTokenRepository {
    pool: PgPool,
}

impl PostgresTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn token_from_row(row: &PgRow) -> Result<CapabilityToken, RepositoryError> {
    let persist: serde_json::Value = row.try_get("persist")?;
    let persist: Persist = serde_json::from_value(persist)?;
    let extra: serde_json::Value = row.try_get("extra")?;
    let extra: TokenExtra = serde_json::from_value(extra)?;
    let content_id: Option<Uuid> = row.try_get("content_id")?;
    Ok(CapabilityToken {
        id: TokenId(row.try_get("id")?),
        token: row.try_get("token")?,
        component_id: ComponentId(row.try_get("component_id")?),
        content_id: content_id.map(ContentId),
        referrer: row.try_get("referrer")?,
        session_key: row.try_get("session_key")?,
        persist,
        extra,
        created: row.try_get("created")?,
    })
}

fn persist_anchor(persist: Persist) -> Option<Uuid> {
    match persist {
        Persist::Anchored(content) => Some(content.0),
        Persist::Ephemeral | Persist::Component => None,
    }
}

#[async_trait]
impl TokenRepository for PostgresTokenRepository {
    async fn insert(&self, token: &CapabilityToken) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO tokens (
                id, token, component_id, content_id, referrer, session_key,
                persist, persist_anchor, extra, created
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(token.id.0)
        .bind(&token.token)
        .bind(token.component_id.0)
        .bind(token.content_id.map(|c| c.0))
        .bind(&token.referrer)
        .bind(&token.session_key)
        .bind(serde_json::to_value(token.persist)?)
        .bind(persist_anchor(token.persist))
        .bind(serde_json::to_value(&token.extra)?)
        .bind(token.created)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, token: &CapabilityToken) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE tokens SET
                token = $2, content_id = $3, referrer = $4, session_key = $5,
                persist = $6, persist_anchor = $7, extra = $8, created = $9
            WHERE id = $1
            "#,
        )
        .bind(token.id.0)
        .bind(&token.token)
        .bind(token.content_id.map(|c| c.0))
        .bind(&token.referrer)
        .bind(&token.session_key)
        .bind(serde_json::to_value(token.persist)?)
        .bind(persist_anchor(token.persist))
        .bind(serde_json::to_value(&token.extra)?)
        .bind(token.created)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("token {}", token.id.0)));
        }
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<CapabilityToken>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token = $1"))
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn find_persistent(
        &self,
        component: ComponentId,
        referrer: &str,
    ) -> Result<Option<CapabilityToken>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens \
             WHERE component_id = $1 AND referrer = $2 AND persist->>'mode' <> 'ephemeral' \
             ORDER BY created ASC LIMIT 1"
        ))
        .bind(component.0)
        .bind(referrer)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn delete(&self, id: TokenId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM tokens WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, filter: &TokenQuery) -> Result<Vec<CapabilityToken>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens \
             WHERE ($1::uuid IS NULL OR component_id = $1) \
               AND ($2::text IS NULL OR referrer = $2) \
               AND ($3::timestamptz IS NULL OR created < $3) \
             ORDER BY created ASC"
        ))
        .bind(filter.component.map(|c| c.0))
        .bind(&filter.referrer)
        .bind(filter.created_before)
        .fetch_all(&self.pool)
        .await?;

        let mut tokens = Vec::new();
        for row in &rows {
            if filter.oldest.is_some_and(|n| tokens.len() >= n) {
                break;
            }
            let token = token_from_row(row)?;
            if filter.anchor.matches(token.persist) {
                tokens.push(token);
            }
        }
        Ok(tokens)
    }

    async fn delete_matching(&self, filter: &TokenQuery) -> Result<u64, RepositoryError> {
        let ids: Vec<Uuid> = self.list(filter).await?.iter().map(|t| t.id.0).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM tokens WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
