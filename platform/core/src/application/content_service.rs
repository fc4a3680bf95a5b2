// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Content Service
//!
//! Creates content items through the variant registry and keeps them within
//! their component's strength.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use crate::domain::component::ComponentId;
use crate::domain::content::{Content, ContentError, ContentId, ContentVariantRegistry};
use crate::domain::info::{InfoError, InfoUpdate};
use crate::domain::repository::{ComponentRepository, ContentRepository, RepositoryError};
use crate::domain::strength::StrengthError;

#[derive(Debug, Error)]
pub enum ContentServiceError {
    #[error("component not found")]
    ComponentNotFound,

    #[error("content not found")]
    NotFound,

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Info(#[from] InfoError),

    #[error(transparent)]
    Strength(#[from] StrengthError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct ContentService {
    components: Arc<dyn ComponentRepository>,
    contents: Arc<dyn ContentRepository>,
    variants: Arc<ContentVariantRegistry>,
}

impl ContentService {
    pub fn new(
        components: Arc<dyn ComponentRepository>,
        contents: Arc<dyn ContentRepository>,
        variants: Arc<ContentVariantRegistry>,
    ) -> Self {
        Self {
            components,
            contents,
            variants,
        }
    }

    pub fn variants(&self) -> &ContentVariantRegistry {
        &self.variants
    }

    /// Create a content item of `variant` inside `component`.
    pub async fn create(
        &self,
        component: ComponentId,
        variant: &str,
        name: &str,
    ) -> Result<Content, ContentServiceError> {
        let component = self
            .components
            .find_by_id(component)
            .await?
            .ok_or(ContentServiceError::ComponentNotFound)?;
        let variant = self.variants.get(variant)?;

        if variant.unique {
            let existing = self.contents.list_by_component(component.id).await?;
            if existing.iter().any(|c| c.content_type == variant.code) {
                return Err(ContentError::UniqueVariant(variant.code.clone()).into());
            }
        }

        let content = Content::new(&component, variant, name)?;
        self.contents.save(&content).await?;
        info!(content_id = %content.id, component_id = %component.id, variant = %variant.code, "Created content");
        Ok(content)
    }

    pub async fn get(&self, id: ContentId) -> Result<Content, ContentServiceError> {
        self.contents
            .find_by_id(id)
            .await?
            .ok_or(ContentServiceError::NotFound)
    }

    /// Apply a batch of info updates; nothing changes if one is invalid.
    pub async fn update_info(
        &self,
        id: ContentId,
        updates: Vec<(String, InfoUpdate)>,
    ) -> Result<Content, ContentServiceError> {
        let mut content = self.get(id).await?;
        content
            .info
            .replace_info(updates.iter().map(|(name, update)| (name.as_str(), update.clone())))?;
        content.modified = Utc::now();
        self.contents.save(&content).await?;
        Ok(content)
    }

    /// Raise or lower a content's strength; it may never exceed the
    /// component's strength.
    pub async fn set_strength(&self, id: ContentId, strength: u8) -> Result<Content, ContentServiceError> {
        let mut content = self.get(id).await?;
        let component = self
            .components
            .find_by_id(content.component_id)
            .await?
            .ok_or(ContentServiceError::ComponentNotFound)?;
        content.strength = strength;
        content.check_strength(&component)?;
        content.modified = Utc::now();
        self.contents.save(&content).await?;
        Ok(content)
    }

    pub async fn request_deletion(&self, id: ContentId) -> Result<Content, ContentServiceError> {
        let mut content = self.get(id).await?;
        content.request_deletion(Utc::now());
        self.contents.save(&content).await?;
        Ok(content)
    }
}
