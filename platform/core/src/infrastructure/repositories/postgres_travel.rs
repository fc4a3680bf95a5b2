// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Travel Repository
//!
//! Overlays live in `travel_protections`; their shields are rows of the
//! `travel_shields` join table keyed by (overlay, target kind, target id).

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::component::ComponentId;
use crate::domain::content::ContentId;
use crate::domain::repository::{RepositoryError, TravelRepository};
use crate::domain::travel::{LoginProtection, ShieldTarget, TravelProtection};
use crate::domain::user::UserId;

const TRAVEL_COLUMNS: &str = "id, owner_id, component_id, active, start_at, stop_at, login_protection, \
     trigger_hashes, self_protection_hash, anonymous_deactivation";

pub struct PostgresTravelRepository {
    pool: PgPool,
}

impl PostgresTravelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_shields(&self, overlays: &[Uuid]) -> Result<HashMap<Uuid, BTreeSet<ShieldTarget>>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT overlay_id, target_kind, target_id FROM travel_shields WHERE overlay_id = ANY($1)",
        )
        .bind(overlays)
        .fetch_all(&self.pool)
        .await?;

        let mut shields: HashMap<Uuid, BTreeSet<ShieldTarget>> = HashMap::new();
        for row in &rows {
            let overlay: Uuid = row.try_get("overlay_id")?;
            let kind: String = row.try_get("target_kind")?;
            let target: Uuid = row.try_get("target_id")?;
            let target = match kind.as_str() {
                "component" => ShieldTarget::Component(ComponentId(target)),
                "content" => ShieldTarget::Content(ContentId(target)),
                other => {
                    return Err(RepositoryError::Serialization(format!("unknown shield target '{other}'")));
                }
            };
            shields.entry(overlay).or_default().insert(target);
        }
        Ok(shields)
    }
}

fn target_columns(target: ShieldTarget) -> (&'static str, Uuid) {
    match target {
        ShieldTarget::Component(id) => ("component", id.0),
        ShieldTarget::Content(id) => ("content", id.0),
    }
}

fn overlay_from_row(row: &PgRow) -> Result<TravelProtection, RepositoryError> {
    let policy: String = row.try_get("login_protection")?;
    let login_protection: LoginProtection = policy.parse().map_err(RepositoryError::Serialization)?;
    let trigger_hashes: serde_json::Value = row.try_get("trigger_hashes")?;
    Ok(TravelProtection {
        id: ContentId(row.try_get("id")?),
        owner: UserId(row.try_get("owner_id")?),
        component_id: ComponentId(row.try_get("component_id")?),
        active: row.try_get("active")?,
        start: row.try_get("start_at")?,
        stop: row.try_get("stop_at")?,
        login_protection,
        trigger_hashes: serde_json::from_value(trigger_hashes)?,
        self_protection_hash: row.try_get("self_protection_hash")?,
        anonymous_deactivation: row.try_get("anonymous_deactivation")?,
        shields: BTreeSet::new(),
    })
}

#[async_trait]
impl TravelRepository for PostgresTravelRepository {
    async fn find_by_id(&self, id: ContentId) -> Result<Option<TravelProtection>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TRAVEL_COLUMNS} FROM travel_protections WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut overlay = overlay_from_row(&row)?;
        let mut shields = self.load_shields(&[id.0]).await?;
        overlay.shields = shields.remove(&id.0).unwrap_or_default();
        Ok(Some(overlay))
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<TravelProtection>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRAVEL_COLUMNS} FROM travel_protections WHERE owner_id = $1 ORDER BY id"
        ))
        .bind(owner.0)
        .fetch_all(&self.pool)
        .await?;
        let mut overlays = rows.iter().map(overlay_from_row).collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<Uuid> = overlays.iter().map(|o| o.id.0).collect();
        let mut shields = self.load_shields(&ids).await?;
        for overlay in &mut overlays {
            overlay.shields = shields.remove(&overlay.id.0).unwrap_or_default();
        }
        Ok(overlays)
    }

    async fn save(&self, overlay: &TravelProtection) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO travel_protections (
                id, owner_id, component_id, active, start_at, stop_at, login_protection,
                trigger_hashes, self_protection_hash, anonymous_deactivation
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                active = EXCLUDED.active,
                start_at = EXCLUDED.start_at,
                stop_at = EXCLUDED.stop_at,
                login_protection = EXCLUDED.login_protection,
                trigger_hashes = EXCLUDED.trigger_hashes,
                self_protection_hash = EXCLUDED.self_protection_hash,
                anonymous_deactivation = EXCLUDED.anonymous_deactivation
            "#,
        )
        .bind(overlay.id.0)
        .bind(overlay.owner.0)
        .bind(overlay.component_id.0)
        .bind(overlay.active)
        .bind(overlay.start)
        .bind(overlay.stop)
        .bind(overlay.login_protection.as_str())
        .bind(serde_json::to_value(&overlay.trigger_hashes)?)
        .bind(&overlay.self_protection_hash)
        .bind(overlay.anonymous_deactivation)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM travel_shields WHERE overlay_id = $1")
            .bind(overlay.id.0)
            .execute(&mut *tx)
            .await?;
        for link in overlay.links() {
            let (kind, target) = target_columns(link.target);
            sqlx::query("INSERT INTO travel_shields (overlay_id, target_kind, target_id) VALUES ($1, $2, $3)")
                .bind(link.overlay.0)
                .bind(kind)
                .bind(target)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, id: ContentId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM travel_protections WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
