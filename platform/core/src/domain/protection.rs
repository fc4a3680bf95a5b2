// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Protection Kinds and Assignments
//!
//! A *protection kind* is a stateless policy that evaluates one factor of an
//! access or authentication decision (a password, a friend list, a rate
//! limit). An [`AssignedProtection`] binds one kind to one component together
//! with the kind-specific configuration and a [`ProtectionState`].
//!
//! | Type | Role |
//! |------|------|
//! | [`ProtectionType`] | Capability bitset of a kind (`access_control`, `authentication`, ...) |
//! | [`ProtectionKind`] | Plugin interface implemented in `crate::infrastructure::protections` |
//! | [`ProtectionOutcome`] | Result of a single `evaluate` call |
//! | [`AssignedProtection`] | Persisted (component, kind) binding |
//!
//! Kinds are registered explicitly in a [`crate::domain::catalog::ProtectionCatalog`]
//! at startup; there is no global registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::auth::AuthRequest;
use crate::domain::component::ComponentId;

/// Kind-specific configuration of an assignment (opaque to the engine).
pub type ProtectionConfig = serde_json::Map<String, serde_json::Value>;

/// Capability flags of a protection kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtectionType(u8);

impl ProtectionType {
    pub const NONE: Self = Self(0);
    /// Gates viewing/listing of a component.
    pub const ACCESS_CONTROL: Self = Self(1 << 0);
    /// Can authenticate as the owner (login, component auth).
    pub const AUTHENTICATION: Self = Self(1 << 1);
    /// Never counts towards `required_passes`.
    pub const NO_COUNT: Self = Self(1 << 2);
    /// Must run on every evaluation, even when the caller narrows the factors.
    pub const SIDE_EFFECTS: Self = Self(1 << 3);
    /// Reads the submitted password field.
    pub const PASSWORD: Self = Self(1 << 4);

    const ALL_BITS: u8 = 0b1_1111;
    const LETTERS: [(Self, char); 5] = [
        (Self::ACCESS_CONTROL, 'a'),
        (Self::AUTHENTICATION, 'b'),
        (Self::NO_COUNT, 'd'),
        (Self::SIDE_EFFECTS, 'e'),
        (Self::PASSWORD, 'f'),
    ];

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL_BITS)
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// True if every flag of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Compact letter form used by the persisted kind table (`"abe"`).
    pub fn to_letters(self) -> String {
        Self::LETTERS
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, letter)| *letter)
            .collect()
    }

    /// Parse the letter form; unknown letters are ignored.
    pub fn from_letters(letters: &str) -> Self {
        letters.chars().fold(Self::NONE, |acc, c| {
            Self::LETTERS
                .iter()
                .find(|(_, letter)| *letter == c)
                .map(|(flag, _)| acc | *flag)
                .unwrap_or(acc)
        })
    }
}

impl BitOr for ProtectionType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Display for ProtectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_letters())
    }
}

/// State of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionState {
    Disabled,
    Enabled,
    /// Gatekeeper: a non-success denies the whole evaluation.
    InstantFail,
}

impl ProtectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Enabled => "enabled",
            Self::InstantFail => "instant_fail",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "disabled" => Some(Self::Disabled),
            "enabled" => Some(Self::Enabled),
            "instant_fail" => Some(Self::InstantFail),
            _ => None,
        }
    }
}

/// Globally unique code of a protection kind (`"password"`, `"friends"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtectionCode(pub String);

impl ProtectionCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Codes are short slugs: `[a-z0-9_-]{1,10}`.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= 10
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    }
}

impl fmt::Display for ProtectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProtectionCode {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Strength interval (0-4) a kind can contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrengthRange {
    pub min: u8,
    pub max: u8,
}

impl StrengthRange {
    pub const fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, strength: u8) -> u8 {
        strength.clamp(self.min, self.max)
    }
}

/// One input field of a challenge form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeField {
    pub name: String,
    pub kind: ChallengeFieldKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeFieldKind {
    Password,
    Text,
    Hidden,
}

/// A per-protection challenge that must be answered before a retry can pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeForm {
    pub code: ProtectionCode,
    pub title: String,
    pub fields: Vec<ChallengeField>,
}

impl ChallengeForm {
    pub fn new(code: ProtectionCode, title: impl Into<String>) -> Self {
        Self {
            code,
            title: title.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: &str, kind: ChallengeFieldKind, prompt: Option<&str>) -> Self {
        self.fields.push(ChallengeField {
            name: name.to_string(),
            kind,
            prompt: prompt.map(str::to_string),
        });
        self
    }

    /// Generic password prompt placed in front of the forms when any
    /// evaluated kind reads the password field.
    pub fn password_prompt() -> Self {
        Self::new(ProtectionCode::new("_password"), "Password")
            .with_field("password", ChallengeFieldKind::Password, None)
    }
}

/// Result of one `ProtectionKind::evaluate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectionOutcome {
    /// Not satisfied; not rendered.
    Fail,
    /// Satisfied, contributing the given strength.
    Pass(u8),
    /// More input is needed.
    Pending(ChallengeForm),
    /// Disguise the endpoint as nonexistent (HTTP 404).
    Disguise,
}

impl ProtectionOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass(_))
    }
}

/// Append-only audit record written by kinds that track attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,
}

/// Failure inside a protection plugin.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtectionError {
    #[error("invalid configuration for protection '{code}': {reason}")]
    InvalidConfig { code: ProtectionCode, reason: String },

    #[error("protection '{code}' failed internally: {reason}")]
    Internal { code: ProtectionCode, reason: String },
}

/// Pluggable policy evaluating one factor.
///
/// Implementations are stateless with respect to a single request; any
/// shared state (rate-limit counters) must be internally synchronized.
/// `evaluate` must not block on network I/O.
pub trait ProtectionKind: Send + Sync {
    fn code(&self) -> ProtectionCode;

    fn name(&self) -> &str;

    fn ptype(&self) -> ProtectionType;

    fn strength_range(&self) -> StrengthRange;

    fn evaluate(
        &self,
        request: &AuthRequest,
        assignment: &AssignedProtection,
    ) -> Result<ProtectionOutcome, ProtectionError>;

    /// Reject malformed configuration before it is persisted.
    fn validate_config(&self, _config: &ProtectionConfig) -> Result<(), ProtectionError> {
        Ok(())
    }

    /// Strength this assignment contributes, used when recomputing the
    /// component strength. Defaults to the static range.
    fn configured_strength(&self, _config: &ProtectionConfig) -> StrengthRange {
        self.strength_range()
    }

    /// Optional audit record for this attempt.
    fn audit(
        &self,
        _request: &AuthRequest,
        _assignment: &AssignedProtection,
        _outcome: &ProtectionOutcome,
    ) -> Option<AuditEntry> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssignmentId(pub Uuid);

impl AssignmentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AssignmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Binding of a protection kind to a component.
///
/// At most one assignment exists per (component, code) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedProtection {
    pub id: AssignmentId,
    pub component_id: ComponentId,
    pub code: ProtectionCode,
    #[serde(default)]
    pub data: ProtectionConfig,
    pub state: ProtectionState,
    #[serde(default)]
    pub audit_log: Vec<AuditEntry>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl AssignedProtection {
    pub fn new(component_id: ComponentId, code: ProtectionCode, state: ProtectionState) -> Self {
        let now = Utc::now();
        Self {
            id: AssignmentId::new(),
            component_id,
            code,
            data: ProtectionConfig::new(),
            state,
            audit_log: Vec::new(),
            created: now,
            modified: now,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = data {
            self.data = map;
        }
        self
    }

    pub fn is_active(&self) -> bool {
        self.state != ProtectionState::Disabled
    }

    pub fn is_instant_fail(&self) -> bool {
        self.state == ProtectionState::InstantFail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ptype_contains_and_letters() {
        let ptype = ProtectionType::ACCESS_CONTROL | ProtectionType::SIDE_EFFECTS;
        assert!(ptype.contains(ProtectionType::ACCESS_CONTROL));
        assert!(!ptype.contains(ProtectionType::AUTHENTICATION));
        assert!(ptype.contains(ProtectionType::NONE));
        assert_eq!(ptype.to_letters(), "ae");
        assert_eq!(ProtectionType::from_letters("ae"), ptype);
        assert_eq!(ProtectionType::from_letters("axz"), ProtectionType::ACCESS_CONTROL);
    }

    #[test]
    fn test_code_validation() {
        assert!(ProtectionCode::new("password").is_valid());
        assert!(ProtectionCode::new("rate_limit").is_valid());
        assert!(!ProtectionCode::new("").is_valid());
        assert!(!ProtectionCode::new("Password").is_valid());
        assert!(!ProtectionCode::new("way_too_long_code").is_valid());
    }

    #[test]
    fn test_state_roundtrip_names() {
        for state in [ProtectionState::Disabled, ProtectionState::Enabled, ProtectionState::InstantFail] {
            assert_eq!(ProtectionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(ProtectionState::parse("on"), None);
    }
}
