// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL User Repository

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::component::ComponentId;
use crate::domain::repository::{RepositoryError, UserRepository};
use crate::domain::user::{User, UserId};

use super::postgres_component::delete_component_tx;

pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &PgRow) -> Result<User, RepositoryError> {
    Ok(User {
        id: UserId(row.try_get("id")?),
        username: row.try_get("username")?,
        is_active: row.try_get("is_active")?,
        created: row.try_get("created")?,
    })
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT id, username, is_active, created FROM users WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT id, username, is_active, created FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn save(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, is_active, created)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                username = EXCLUDED.username,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(user.id.0)
        .bind(&user.username)
        .bind(user.is_active)
        .bind(user.created)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: UserId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let components: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM components WHERE owner_id = $1")
            .bind(id.0)
            .fetch_all(&mut *tx)
            .await?;
        for component in components {
            delete_component_tx(&mut tx, ComponentId(component)).await?;
        }
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
