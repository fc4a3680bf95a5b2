// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Content Items
//!
//! Content belongs to exactly one component. Its strength can never exceed
//! the strength of that component; this is checked on every write.
//!
//! Concrete content types (text, file, key, ...) plug in through
//! [`ContentVariant`] descriptors collected in a [`ContentVariantRegistry`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::component::{Component, ComponentId};
use crate::domain::info::{InfoError, InfoMap};
use crate::domain::strength::StrengthError;
use crate::domain::token::TokenId;

/// Info flag hiding a content from listings.
pub const HIDDEN_FLAG: &str = "hidden";
/// Info flag marking an anchor content (persistent token target).
pub const ANCHOR_FLAG: &str = "anchor";
/// Info flag excluding a content from listings without hiding direct access.
pub const UNLISTED_FLAG: &str = "unlisted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId(pub Uuid);

impl ContentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("unknown content type '{0}'")]
    UnknownVariant(String),

    #[error("content type '{0}' is already registered")]
    DuplicateVariant(String),

    #[error("content type '{0}' may exist only once per component")]
    UniqueVariant(String),

    #[error(transparent)]
    Strength(#[from] StrengthError),

    #[error(transparent)]
    Info(#[from] InfoError),
}

/// Interface contract of a content type plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentVariant {
    pub code: String,
    pub name: String,
    /// Strength a content of this type starts with.
    pub strength: u8,
    /// At most one content of this type per component.
    #[serde(default)]
    pub unique: bool,
    /// Flags written into the info map on creation.
    #[serde(default)]
    pub default_flags: Vec<String>,
}

impl ContentVariant {
    pub fn new(code: &str, name: &str, strength: u8) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            strength,
            unique: false,
            default_flags: Vec::new(),
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_flag(mut self, flag: &str) -> Self {
        self.default_flags.push(flag.to_string());
        self
    }
}

/// Explicit registry of content types, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ContentVariantRegistry {
    variants: BTreeMap<String, ContentVariant>,
}

impl ContentVariantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the types shipped by the platform.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for variant in [
            ContentVariant::new("text", "Text", 0),
            ContentVariant::new("file", "File", 0),
            ContentVariant::new("key", "PublicKey", 0).with_flag(ANCHOR_FLAG),
            ContentVariant::new("tag", "Tag", 0).with_flag(UNLISTED_FLAG),
            ContentVariant::new("travel", "TravelProtection", 0)
                .with_flag(UNLISTED_FLAG),
        ] {
            // builtin codes are distinct
            let _ = registry.register(variant);
        }
        registry
    }

    pub fn register(&mut self, variant: ContentVariant) -> Result<(), ContentError> {
        if self.variants.contains_key(&variant.code) {
            return Err(ContentError::DuplicateVariant(variant.code));
        }
        self.variants.insert(variant.code.clone(), variant);
        Ok(())
    }

    pub fn get(&self, code: &str) -> Result<&ContentVariant, ContentError> {
        self.variants
            .get(code)
            .ok_or_else(|| ContentError::UnknownVariant(code.to_string()))
    }

    pub fn list(&self) -> impl Iterator<Item = &ContentVariant> {
        self.variants.values()
    }
}

/// Content record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub id: ContentId,
    pub component_id: ComponentId,
    pub content_type: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub strength: u8,
    #[serde(default)]
    pub info: InfoMap,
    /// Persistent token this content is bound to.
    #[serde(default)]
    pub persist_token: Option<TokenId>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub deletion_requested: Option<DateTime<Utc>>,
}

impl Content {
    pub fn new(component: &Component, variant: &ContentVariant, name: &str) -> Result<Self, ContentError> {
        let mut info = InfoMap::new();
        for flag in &variant.default_flags {
            info.set_flag(flag, true)?;
        }
        let now = Utc::now();
        let content = Self {
            id: ContentId::new(),
            component_id: component.id,
            content_type: variant.code.clone(),
            name: name.to_string(),
            description: String::new(),
            strength: variant.strength,
            info,
            persist_token: None,
            created: now,
            modified: now,
            deletion_requested: None,
        };
        content.check_strength(component)?;
        Ok(content)
    }

    /// Content strength must not exceed its component's strength.
    pub fn check_strength(&self, component: &Component) -> Result<(), StrengthError> {
        if self.strength > component.strength() {
            return Err(StrengthError::Insufficient {
                required: self.strength,
                actual: component.strength(),
            });
        }
        Ok(())
    }

    pub fn getflag(&self, name: &str) -> bool {
        self.info.getflag(name)
    }

    pub fn getlist(&self, name: &str) -> &[String] {
        self.info.getlist(name)
    }

    pub fn is_hidden(&self) -> bool {
        self.info.getflag(HIDDEN_FLAG)
    }

    pub fn is_listed(&self) -> bool {
        !self.info.getflag(HIDDEN_FLAG) && !self.info.getflag(UNLISTED_FLAG)
    }

    pub fn request_deletion(&mut self, at: DateTime<Utc>) {
        self.deletion_requested.get_or_insert(at);
        self.modified = Utc::now();
    }

    pub fn deletion_due(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        match (self.deletion_requested, chrono::Duration::from_std(grace)) {
            (Some(requested), Ok(grace)) => requested
                .checked_add_signed(grace)
                .is_some_and(|due| due <= now),
            _ => false,
        }
    }
}
