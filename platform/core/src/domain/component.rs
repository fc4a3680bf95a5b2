// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Component Aggregate
//!
//! A component is a named container owned by one user. Its `strength` is
//! derived from the assigned protections (see [`crate::domain::strength`]) and
//! is never written directly by callers.
//!
//! Two names are reserved for the authentication gate:
//! - `index`: the real login gate of a user.
//! - `fake_index`: the decoy root presented after a duress login.
//!
//! Reserved components always have strength 10 and can never be public.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::content::ContentId;
use crate::domain::strength::{
    component_strength, ProtectionStrength, StrengthError, CAN_AUTH_STRENGTH, MAX_STRENGTH,
};
use crate::domain::user::UserId;

pub const INDEX_NAME: &str = "index";
pub const FAKE_INDEX_NAME: &str = "fake_index";
pub const RESERVED_NAMES: [&str; 2] = [INDEX_NAME, FAKE_INDEX_NAME];
pub const MAX_NAME_LENGTH: usize = 50;

pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub Uuid);

impl ComponentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ComponentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability add-ons a component can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Tokens may be persisted to the component or to an anchor content.
    Persistence,
    /// The component may be embedded by an external domain.
    DomainMode,
}

impl Feature {
    /// Minimum component strength required to enable the feature.
    pub fn min_strength(&self) -> u8 {
        match self {
            Feature::Persistence => 0,
            Feature::DomainMode => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Persistence => "persistence",
            Feature::DomainMode => "domain_mode",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComponentError {
    #[error("component name '{0}' is reserved")]
    ReservedName(String),

    #[error("invalid component name '{0}'")]
    InvalidName(String),

    #[error("reserved component '{0}' cannot be public")]
    ReservedNotPublic(String),

    #[error("feature '{feature}' needs strength {required}, component has {actual}")]
    FeatureStrength {
        feature: &'static str,
        required: u8,
        actual: u8,
    },

    #[error(transparent)]
    Strength(#[from] StrengthError),
}

/// Component aggregate root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    pub owner: UserId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub public: bool,
    pub required_passes: u32,
    strength: u8,
    can_auth: bool,
    /// TTL of ephemeral tokens issued for this component.
    #[serde(with = "humantime_serde")]
    pub token_duration: Duration,
    #[serde(default)]
    pub features: BTreeSet<Feature>,
    /// Content persistent tokens are anchored to by default.
    #[serde(default)]
    pub primary_anchor: Option<ContentId>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub deletion_requested: Option<DateTime<Utc>>,
}

impl Component {
    /// Create a regular (non-reserved) component.
    pub fn new(owner: UserId, name: &str, token_duration: Duration) -> Result<Self, ComponentError> {
        if is_reserved_name(name) {
            return Err(ComponentError::ReservedName(name.to_string()));
        }
        validate_name(name)?;
        let mut component = Self::blank(owner, name, token_duration);
        component.strength = component_strength(false, ProtectionStrength::default());
        Ok(component)
    }

    /// Create the login gate (`index`) or its decoy (`fake_index`).
    ///
    /// Reserved components require one pass by default.
    pub fn new_reserved(owner: UserId, name: &str, token_duration: Duration) -> Result<Self, ComponentError> {
        if !is_reserved_name(name) {
            return Err(ComponentError::InvalidName(name.to_string()));
        }
        let mut component = Self::blank(owner, name, token_duration);
        component.required_passes = 1;
        component.strength = MAX_STRENGTH;
        Ok(component)
    }

    fn blank(owner: UserId, name: &str, token_duration: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: ComponentId::new(),
            owner,
            name: name.to_string(),
            description: String::new(),
            public: false,
            required_passes: 0,
            strength: 0,
            can_auth: false,
            token_duration,
            features: BTreeSet::new(),
            primary_anchor: None,
            created: now,
            modified: now,
            deletion_requested: None,
        }
    }

    /// Rebuild from storage with the persisted derived fields.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: ComponentId,
        owner: UserId,
        name: String,
        description: String,
        public: bool,
        required_passes: u32,
        strength: u8,
        can_auth: bool,
        token_duration: Duration,
        features: BTreeSet<Feature>,
        primary_anchor: Option<ContentId>,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
        deletion_requested: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            owner,
            name,
            description,
            public,
            required_passes,
            strength,
            can_auth,
            token_duration,
            features,
            primary_anchor,
            created,
            modified,
            deletion_requested,
        }
    }

    pub fn strength(&self) -> u8 {
        self.strength
    }

    pub fn can_auth(&self) -> bool {
        self.can_auth
    }

    pub fn is_reserved(&self) -> bool {
        is_reserved_name(&self.name)
    }

    pub fn is_fake_index(&self) -> bool {
        self.name == FAKE_INDEX_NAME
    }

    pub fn set_public(&mut self, public: bool) -> Result<(), ComponentError> {
        if public && self.is_reserved() {
            return Err(ComponentError::ReservedNotPublic(self.name.clone()));
        }
        self.public = public;
        self.touch();
        Ok(())
    }

    /// Apply freshly computed protection strength.
    ///
    /// Reserved components stay at 10 but their protection set must reach
    /// `min_login_strength`.
    pub fn apply_protection_strength(
        &mut self,
        protection: ProtectionStrength,
        min_login_strength: u8,
    ) -> Result<(), ComponentError> {
        if self.is_reserved() {
            if protection.strength < min_login_strength {
                return Err(StrengthError::Insufficient {
                    required: min_login_strength,
                    actual: protection.strength,
                }
                .into());
            }
            self.strength = MAX_STRENGTH;
        } else {
            self.strength = component_strength(self.public, protection);
        }
        self.can_auth = protection.max_strength >= CAN_AUTH_STRENGTH;
        self.check_features()?;
        self.touch();
        Ok(())
    }

    pub fn enable_feature(&mut self, feature: Feature) -> Result<(), ComponentError> {
        self.ensure_feature_strength(feature)?;
        self.features.insert(feature);
        self.touch();
        Ok(())
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    fn check_features(&self) -> Result<(), ComponentError> {
        self.features
            .iter()
            .try_for_each(|feature| self.ensure_feature_strength(*feature))
    }

    fn ensure_feature_strength(&self, feature: Feature) -> Result<(), ComponentError> {
        if feature.min_strength() > self.strength {
            return Err(ComponentError::FeatureStrength {
                feature: feature.as_str(),
                required: feature.min_strength(),
                actual: self.strength,
            });
        }
        Ok(())
    }

    pub fn request_deletion(&mut self, at: DateTime<Utc>) {
        self.deletion_requested.get_or_insert(at);
        self.touch();
    }

    pub fn cancel_deletion(&mut self) {
        self.deletion_requested = None;
        self.touch();
    }

    /// True once the soft-deletion grace period has elapsed.
    pub fn deletion_due(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        match (self.deletion_requested, chrono::Duration::from_std(grace)) {
            (Some(requested), Ok(grace)) => requested
                .checked_add_signed(grace)
                .is_some_and(|due| due <= now),
            _ => false,
        }
    }

    /// Expiry of an ephemeral token created at `created`; `None` means never.
    pub fn token_expiry(&self, created: DateTime<Utc>) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.token_duration)
            .ok()
            .and_then(|ttl| created.checked_add_signed(ttl))
    }

    fn touch(&mut self) {
        self.modified = Utc::now();
    }
}

fn validate_name(name: &str) -> Result<(), ComponentError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LENGTH
        && !name.contains('/')
        && !name.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(ComponentError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    #[test]
    fn test_reserved_names_rejected_for_regular_components() {
        let owner = UserId::new();
        assert!(matches!(
            Component::new(owner, "index", DAY),
            Err(ComponentError::ReservedName(_))
        ));
        assert!(matches!(
            Component::new(owner, "", DAY),
            Err(ComponentError::InvalidName(_))
        ));
        assert!(Component::new(owner, "home", DAY).is_ok());
    }

    #[test]
    fn test_reserved_component_invariants() {
        let mut index = Component::new_reserved(UserId::new(), INDEX_NAME, DAY).unwrap();
        assert_eq!(index.strength(), MAX_STRENGTH);
        assert_eq!(index.required_passes, 1);
        assert!(matches!(
            index.set_public(true),
            Err(ComponentError::ReservedNotPublic(_))
        ));

        let weak = ProtectionStrength { strength: 1, max_strength: 1 };
        assert!(matches!(
            index.apply_protection_strength(weak, 2),
            Err(ComponentError::Strength(StrengthError::Insufficient { required: 2, actual: 1 }))
        ));

        let login_only = ProtectionStrength { strength: 4, max_strength: 0 };
        index.apply_protection_strength(login_only, 2).unwrap();
        assert_eq!(index.strength(), MAX_STRENGTH);
    }

    #[test]
    fn test_regular_strength_never_reaches_ten() {
        let mut home = Component::new(UserId::new(), "home", DAY).unwrap();
        home.apply_protection_strength(ProtectionStrength { strength: 4, max_strength: 4 }, 2)
            .unwrap();
        assert_eq!(home.strength(), 9);
        assert!(home.can_auth());

        home.set_public(true).unwrap();
        home.apply_protection_strength(ProtectionStrength { strength: 1, max_strength: 1 }, 2)
            .unwrap();
        assert_eq!(home.strength(), 1);
        assert!(!home.can_auth());
    }

    #[test]
    fn test_feature_strength_gate() {
        let mut home = Component::new(UserId::new(), "home", DAY).unwrap();
        home.set_public(true).unwrap();
        home.apply_protection_strength(ProtectionStrength::default(), 2).unwrap();
        assert!(matches!(
            home.enable_feature(Feature::DomainMode),
            Err(ComponentError::FeatureStrength { required: 5, actual: 0, .. })
        ));
        home.enable_feature(Feature::Persistence).unwrap();
        assert!(home.has_feature(Feature::Persistence));
    }

    #[test]
    fn test_deletion_grace() {
        let mut home = Component::new(UserId::new(), "home", DAY).unwrap();
        let now = Utc::now();
        assert!(!home.deletion_due(now, DAY));
        home.request_deletion(now - chrono::Duration::days(2));
        assert!(home.deletion_due(now, DAY));
        home.cancel_deletion();
        assert!(!home.deletion_due(now, DAY));
    }
}
