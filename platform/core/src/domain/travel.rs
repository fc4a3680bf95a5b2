// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Travel Protection Overlays
//!
//! A travel protection is a special content item that shields a set of
//! components and contents while its owner is travelling or under duress.
//!
//! ## State machine
//!
//! ```text
//!            active && start <= now <= stop
//! Inactive ─────────────────────────────────▶ Active
//!     ▲                                          │ login event
//!     └──── deactivate (self-protection secret)  ▼
//!                                       dispatch login_protection
//! ```
//!
//! Overlays with trigger passwords only apply to sessions in which one of
//! those passwords was entered.
//!
//! The shielded set is an explicit join table ([`ShieldLink`]) of
//! `(overlay, target, target kind)` rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::domain::component::ComponentId;
use crate::domain::content::ContentId;
use crate::domain::repository::RepositoryError;
use crate::domain::user::UserId;

pub const MAX_TRIGGER_PASSWORDS: usize = 20;

#[derive(Debug, Error)]
pub enum TravelError {
    #[error("travel protection not found")]
    NotFound,

    #[error("login protection '{0}' requires at least one trigger password")]
    MissingSecret(LoginProtection),

    #[error("at most {max} trigger passwords allowed, got {actual}")]
    TooManySecrets { max: usize, actual: usize },

    #[error("stop must be after start")]
    InvalidWindow,

    #[error("self-protection secret does not match")]
    SecretMismatch,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// What happens when the owner logs in while the overlay is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginProtection {
    #[default]
    None,
    /// Present the decoy root component instead of the real one.
    FakeLogin,
    /// Hide the shielded set from listings.
    Hide,
    /// Hide, activated by a trigger password.
    TriggerHide,
    /// Lock the shielded components down.
    Disable,
    /// Lock down, activated by a trigger password.
    TriggerDisable,
    /// Delete the shielded contents and components.
    Wipe,
    /// Delete the whole user account.
    WipeUser,
}

impl LoginProtection {
    pub const ALL: [LoginProtection; 8] = [
        LoginProtection::None,
        LoginProtection::FakeLogin,
        LoginProtection::Hide,
        LoginProtection::TriggerHide,
        LoginProtection::Disable,
        LoginProtection::TriggerDisable,
        LoginProtection::Wipe,
        LoginProtection::WipeUser,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoginProtection::None => "none",
            LoginProtection::FakeLogin => "fake_login",
            LoginProtection::Hide => "hide",
            LoginProtection::TriggerHide => "trigger_hide",
            LoginProtection::Disable => "disable",
            LoginProtection::TriggerDisable => "trigger_disable",
            LoginProtection::Wipe => "wipe",
            LoginProtection::WipeUser => "wipe_user",
        }
    }

    /// Variants activated by a trigger password need one before activation.
    pub fn requires_secret(&self) -> bool {
        matches!(self, LoginProtection::TriggerHide | LoginProtection::TriggerDisable)
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, LoginProtection::Wipe | LoginProtection::WipeUser)
    }

    pub fn hides(&self) -> bool {
        matches!(self, LoginProtection::Hide | LoginProtection::TriggerHide)
    }

    pub fn disables(&self) -> bool {
        matches!(self, LoginProtection::Disable | LoginProtection::TriggerDisable)
    }
}

impl fmt::Display for LoginProtection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoginProtection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LoginProtection::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown login protection '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum ShieldTarget {
    Component(ComponentId),
    Content(ContentId),
}

/// Row of the overlay → target join table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShieldLink {
    pub overlay: ContentId,
    pub target: ShieldTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Inactive,
    Active,
}

/// Travel protection overlay. `id` is the id of the backing content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelProtection {
    pub id: ContentId,
    pub owner: UserId,
    /// Component holding the backing content item.
    pub component_id: ComponentId,
    pub active: bool,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub stop: Option<DateTime<Utc>>,
    pub login_protection: LoginProtection,
    /// Salted hashes of trigger passwords.
    #[serde(default)]
    pub trigger_hashes: BTreeSet<String>,
    /// Salted hash of the deactivation secret.
    #[serde(default)]
    pub self_protection_hash: Option<String>,
    #[serde(default)]
    pub anonymous_deactivation: bool,
    #[serde(default)]
    pub shields: BTreeSet<ShieldTarget>,
}

impl TravelProtection {
    pub fn new(id: ContentId, owner: UserId, component_id: ComponentId, login_protection: LoginProtection) -> Self {
        Self {
            id,
            owner,
            component_id,
            active: false,
            start: Utc::now(),
            stop: None,
            login_protection,
            trigger_hashes: BTreeSet::new(),
            self_protection_hash: None,
            anonymous_deactivation: false,
            shields: BTreeSet::new(),
        }
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> OverlayState {
        let in_window = self.start <= now && self.stop.is_none_or(|stop| now <= stop);
        if self.active && in_window {
            OverlayState::Active
        } else {
            OverlayState::Inactive
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.state_at(now) == OverlayState::Active
    }

    pub fn is_password_gated(&self) -> bool {
        !self.trigger_hashes.is_empty()
    }

    /// True if any session password hash matches a trigger password.
    pub fn matches_session(&self, session_hashes: &BTreeSet<String>) -> bool {
        !self.trigger_hashes.is_disjoint(session_hashes)
    }

    /// Applies to a session: active, and (if password gated) triggered in it.
    pub fn applies_to_session(&self, session_hashes: &BTreeSet<String>, now: DateTime<Utc>) -> bool {
        self.is_active_at(now) && (!self.is_password_gated() || self.matches_session(session_hashes))
    }

    pub fn validate(&self, max_trigger_passwords: usize) -> Result<(), TravelError> {
        if self.trigger_hashes.len() > max_trigger_passwords {
            return Err(TravelError::TooManySecrets {
                max: max_trigger_passwords,
                actual: self.trigger_hashes.len(),
            });
        }
        if self.stop.is_some_and(|stop| stop <= self.start) {
            return Err(TravelError::InvalidWindow);
        }
        if self.active && self.login_protection.requires_secret() && self.trigger_hashes.is_empty() {
            return Err(TravelError::MissingSecret(self.login_protection));
        }
        Ok(())
    }

    pub fn activate(&mut self, max_trigger_passwords: usize) -> Result<(), TravelError> {
        self.active = true;
        if let Err(err) = self.validate(max_trigger_passwords) {
            self.active = false;
            return Err(err);
        }
        Ok(())
    }

    /// Deactivate; `secret_hash` is the salted hash of the entered secret.
    pub fn deactivate(&mut self, secret_hash: Option<&str>) -> Result<(), TravelError> {
        if !self.anonymous_deactivation {
            let expected = self.self_protection_hash.as_deref();
            let matches = match (expected, secret_hash) {
                (Some(expected), Some(given)) => bool::from(expected.as_bytes().ct_eq(given.as_bytes())),
                (None, _) => true,
                (Some(_), None) => false,
            };
            if !matches {
                return Err(TravelError::SecretMismatch);
            }
        }
        self.active = false;
        Ok(())
    }

    pub fn shields_component(&self, id: ComponentId) -> bool {
        self.shields.contains(&ShieldTarget::Component(id))
    }

    pub fn shields_content(&self, id: ContentId) -> bool {
        self.shields.contains(&ShieldTarget::Content(id))
    }

    pub fn links(&self) -> impl Iterator<Item = ShieldLink> + '_ {
        self.shields.iter().map(|target| ShieldLink {
            overlay: self.id,
            target: *target,
        })
    }
}
