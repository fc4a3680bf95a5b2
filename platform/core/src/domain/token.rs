// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Capability Tokens
//!
//! A capability token is an unguessable bearer string bound to a component,
//! optionally to one content and optionally to a referrer origin. Its
//! `intentions` scope what the bearer may do with it.
//!
//! ## Intentions
//!
//! | Intention | Kind | Meaning |
//! |-----------|------|---------|
//! | `auth` | main | authenticate against the component |
//! | `domain` | alone | embed the component in the referrer's domain |
//! | `login` | main | log in as the owner |
//! | `payment` | main | authorize payments |
//! | `persist` | main | keep the token past its TTL (needs `Persistence`) |
//! | `sl` | sub | serverless: token handed over by redirect, no POST |
//! | `live` | sub | live updates |
//!
//! At most one main intention is allowed; `domain` must appear alone.
//!
//! ## Persistence
//!
//! [`Persist::Ephemeral`] tokens expire `token_duration` after creation.
//! Persisted tokens (bound to the component or to an anchor content) never
//! expire by time; they are removed only by explicit revocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::component::{Component, ComponentId, Feature};
use crate::domain::content::ContentId;
use crate::domain::repository::RepositoryError;

/// Upper bound of the random part in bytes.
pub const MAX_TOKEN_SIZE: usize = 90;
pub const DEFAULT_TOKEN_SIZE: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId(pub Uuid);

impl TokenId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("token not found")]
    NotFound,

    #[error("could not create a unique token after {attempts} attempts")]
    Creation { attempts: u32 },

    #[error("referrer handshake failed: {reason}")]
    ReferrerHandshakeFailed { reason: String },

    #[error("invalid intention: {0}")]
    InvalidIntention(String),

    #[error("token lacks intention '{0}'")]
    MissingIntention(Intention),

    #[error("invalid referrer: {0}")]
    InvalidReferrer(String),

    #[error("token does not belong to this component")]
    WrongComponent,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl TokenError {
    /// Client mistakes that must never be retried.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidIntention(_)
                | Self::MissingIntention(_)
                | Self::InvalidReferrer(_)
                | Self::WrongComponent
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intention {
    Auth,
    Domain,
    Live,
    Login,
    Payment,
    Persist,
    Sl,
}

impl Intention {
    pub const ALL: [Intention; 7] = [
        Intention::Auth,
        Intention::Domain,
        Intention::Live,
        Intention::Login,
        Intention::Payment,
        Intention::Persist,
        Intention::Sl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intention::Auth => "auth",
            Intention::Domain => "domain",
            Intention::Live => "live",
            Intention::Login => "login",
            Intention::Payment => "payment",
            Intention::Persist => "persist",
            Intention::Sl => "sl",
        }
    }

    /// `sl` and `live` modify a main intention instead of being one.
    pub fn is_sub(&self) -> bool {
        matches!(self, Intention::Sl | Intention::Live)
    }
}

impl fmt::Display for Intention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intention {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Intention::ALL
            .iter()
            .find(|i| i.as_str() == s)
            .copied()
            .ok_or_else(|| TokenError::InvalidIntention(format!("unknown intention '{s}'")))
    }
}

/// Validated set of intentions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentionSet(BTreeSet<Intention>);

impl IntentionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse raw `intention` query values and check the combination rules
    /// that do not depend on the component.
    pub fn parse<'a>(raw: impl IntoIterator<Item = &'a str>) -> Result<Self, TokenError> {
        let set = raw
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(Intention::from_str)
            .collect::<Result<BTreeSet<_>, _>>()?;
        let set = Self(set);
        set.check_combination()?;
        Ok(set)
    }

    pub fn from_intentions(intentions: impl IntoIterator<Item = Intention>) -> Result<Self, TokenError> {
        let set = Self(intentions.into_iter().collect());
        set.check_combination()?;
        Ok(set)
    }

    fn check_combination(&self) -> Result<(), TokenError> {
        if self.contains(Intention::Domain) && self.0.len() > 1 {
            return Err(TokenError::InvalidIntention(
                "domain cannot be combined with other intentions".to_string(),
            ));
        }
        let mains: Vec<_> = self.main_intentions().collect();
        if mains.len() > 1 {
            return Err(TokenError::InvalidIntention(format!(
                "only one main intention allowed, got {}",
                mains.iter().map(|i| i.as_str()).collect::<Vec<_>>().join(", ")
            )));
        }
        if self.contains(Intention::Sl) && !self.contains(Intention::Persist) && self.0.len() > 1 {
            return Err(TokenError::InvalidIntention(
                "serverless is only supported for persist or plain tokens".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks depending on the target component.
    pub fn validate_for(&self, component: &Component) -> Result<(), TokenError> {
        if self.contains(Intention::Persist) && !component.has_feature(Feature::Persistence) {
            return Err(TokenError::InvalidIntention(
                "persist requires the persistence feature".to_string(),
            ));
        }
        Ok(())
    }

    pub fn contains(&self, intention: Intention) -> bool {
        self.0.contains(&intention)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_serverless(&self) -> bool {
        self.contains(Intention::Sl)
    }

    pub fn main_intentions(&self) -> impl Iterator<Item = &Intention> {
        self.0.iter().filter(|i| !i.is_sub())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Intention> {
        self.0.iter()
    }
}

/// Lifetime binding of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "content")]
pub enum Persist {
    Ephemeral,
    Component,
    Anchored(ContentId),
}

impl Persist {
    pub fn is_persistent(&self) -> bool {
        !matches!(self, Persist::Ephemeral)
    }
}

/// Extra data carried by a token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenExtra {
    #[serde(default)]
    pub intentions: IntentionSet,
    /// Authorization strength reached when the token was issued.
    #[serde(default)]
    pub strength: u8,
    /// Set when the token escaped its referrer (e.g. failed renewal push).
    #[serde(default)]
    pub taint: bool,
    /// Contents the token is restricted to; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<ContentId>,
    /// Opaque passthrough from the `payload` query parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// Capability token record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    pub id: TokenId,
    pub token: String,
    pub component_id: ComponentId,
    #[serde(default)]
    pub content_id: Option<ContentId>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub session_key: Option<String>,
    pub persist: Persist,
    #[serde(default)]
    pub extra: TokenExtra,
    pub created: DateTime<Utc>,
}

impl CapabilityToken {
    pub fn new(component_id: ComponentId, token: String, persist: Persist, extra: TokenExtra) -> Self {
        Self {
            id: TokenId::new(),
            token,
            component_id,
            content_id: None,
            referrer: None,
            session_key: None,
            persist,
            extra,
            created: Utc::now(),
        }
    }

    /// Ephemeral tokens expire with the component's TTL.
    pub fn is_expired(&self, component: &Component, now: DateTime<Utc>) -> bool {
        if self.persist.is_persistent() {
            return false;
        }
        component
            .token_expiry(self.created)
            .is_some_and(|expiry| now > expiry)
    }

    pub fn has_intention(&self, intention: Intention) -> bool {
        self.extra.intentions.contains(intention)
    }

    /// Short prefix safe to log.
    pub fn redacted(&self) -> String {
        let prefix: String = self.token.chars().take(6).collect();
        format!("{prefix}…")
    }
}

/// Which tokens a bulk maintenance operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnchorFilter {
    #[default]
    Ephemeral,
    /// Persisted to the component itself.
    Component,
    /// Any persisted token.
    Persist,
    All,
    Content(ContentId),
}

impl AnchorFilter {
    pub fn matches(&self, persist: Persist) -> bool {
        match self {
            AnchorFilter::Ephemeral => persist == Persist::Ephemeral,
            AnchorFilter::Component => persist == Persist::Component,
            AnchorFilter::Persist => persist.is_persistent(),
            AnchorFilter::All => true,
            AnchorFilter::Content(id) => persist == Persist::Anchored(*id),
        }
    }
}

impl FromStr for AnchorFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ephemeral" => Ok(Self::Ephemeral),
            "component" => Ok(Self::Component),
            "persist" => Ok(Self::Persist),
            "all" => Ok(Self::All),
            other => Uuid::parse_str(other)
                .map(|id| Self::Content(ContentId(id)))
                .map_err(|_| format!("invalid anchor filter '{other}'")),
        }
    }
}

/// Digest used for the referrer success hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

/// Token string syntax: URL-safe base64 alphabet only.
pub fn is_valid_token_string(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_TOKEN_SIZE * 4 / 3
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strength::ProtectionStrength;
    use crate::domain::user::UserId;
    use std::time::Duration;

    #[test]
    fn test_intention_parsing_rules() {
        assert!(IntentionSet::parse(["auth"]).is_ok());
        assert!(IntentionSet::parse(["persist", "sl"]).is_ok());
        assert!(IntentionSet::parse(["auth", "live"]).is_ok());
        assert!(IntentionSet::parse(["sl"]).is_ok());
        assert!(IntentionSet::parse(["domain"]).is_ok());

        for bad in [
            vec!["domain", "sl"],
            vec!["auth", "persist"],
            vec!["auth", "sl"],
            vec!["bogus"],
        ] {
            assert!(
                matches!(IntentionSet::parse(bad.clone()), Err(TokenError::InvalidIntention(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_persist_requires_feature() {
        let mut component = Component::new(UserId::new(), "home", Duration::from_secs(60)).unwrap();
        let persist = IntentionSet::parse(["persist"]).unwrap();
        assert!(persist.validate_for(&component).is_err());
        component.enable_feature(Feature::Persistence).unwrap();
        assert!(persist.validate_for(&component).is_ok());
    }

    #[test]
    fn test_expiry_only_for_ephemeral() {
        let mut component = Component::new(UserId::new(), "home", Duration::from_secs(60)).unwrap();
        component
            .apply_protection_strength(ProtectionStrength::default(), 2)
            .unwrap();
        let mut token = CapabilityToken::new(component.id, "abc".into(), Persist::Ephemeral, TokenExtra::default());
        let later = token.created + chrono::Duration::seconds(120);
        assert!(!token.is_expired(&component, token.created));
        assert!(token.is_expired(&component, later));
        token.persist = Persist::Component;
        assert!(!token.is_expired(&component, later));
    }

    #[test]
    fn test_anchor_filter() {
        let content = ContentId::new();
        assert!(AnchorFilter::default().matches(Persist::Ephemeral));
        assert!(!AnchorFilter::default().matches(Persist::Component));
        assert!(AnchorFilter::Persist.matches(Persist::Anchored(content)));
        assert!(AnchorFilter::Content(content).matches(Persist::Anchored(content)));
        assert!(!AnchorFilter::Content(content).matches(Persist::Anchored(ContentId::new())));
        assert_eq!("all".parse::<AnchorFilter>(), Ok(AnchorFilter::All));
        assert!("nope".parse::<AnchorFilter>().is_err());
    }

    #[test]
    fn test_token_string_syntax() {
        assert!(is_valid_token_string("abc-_09XZ"));
        assert!(!is_valid_token_string("abc/def"));
        assert!(!is_valid_token_string(""));
    }
}
