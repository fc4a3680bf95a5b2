// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

// Password protection
//
// Two independent pools of salted hashes:
// - `passwords`: grants access (strength 2)
// - `auth_passwords`: grants access and component authentication (strength 4)
//
// A submitted candidate is hashed once per pool with a pool-specific salt and
// compared in constant time against every entry. Plain passwords are never
// stored nor logged.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::auth::AuthRequest;
use crate::domain::protection::{
    AssignedProtection, AuditEntry, ProtectionCode, ProtectionConfig, ProtectionError,
    ProtectionKind, ProtectionOutcome, ProtectionType, StrengthRange,
};
use crate::infrastructure::crypto::{constant_time_eq, salted_hash};

pub const ACCESS_STRENGTH: u8 = 2;
pub const AUTH_STRENGTH: u8 = 4;
/// Form field carrying the candidate password.
pub const PASSWORD_FIELD: &str = "password";

const ACCESS_PURPOSE: &str = "pw-access";
const AUTH_PURPOSE: &str = "pw-auth";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PasswordConfig {
    #[serde(default)]
    pub passwords: Vec<String>,
    #[serde(default)]
    pub auth_passwords: Vec<String>,
    /// Record attempts in the assignment's audit log
    #[serde(default)]
    pub audit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pool {
    Access,
    Auth,
}

pub struct PasswordProtection {
    secret_key: String,
}

impl std::fmt::Debug for PasswordProtection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordProtection").finish_non_exhaustive()
    }
}

impl PasswordProtection {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
        }
    }

    pub fn hash_access_password(&self, password: &str) -> String {
        salted_hash(&self.secret_key, ACCESS_PURPOSE, password)
    }

    pub fn hash_auth_password(&self, password: &str) -> String {
        salted_hash(&self.secret_key, AUTH_PURPOSE, password)
    }

    /// Build assignment data from clear-text passwords.
    pub fn config_from_clear(&self, access: &[&str], auth: &[&str], audit: bool) -> ProtectionConfig {
        let config = PasswordConfig {
            passwords: access.iter().map(|p| self.hash_access_password(p)).collect(),
            auth_passwords: auth.iter().map(|p| self.hash_auth_password(p)).collect(),
            audit,
        };
        match serde_json::to_value(config) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => ProtectionConfig::new(),
        }
    }

    fn parse(&self, config: &ProtectionConfig) -> Result<PasswordConfig, ProtectionError> {
        serde_json::from_value(serde_json::Value::Object(config.clone())).map_err(|e| {
            ProtectionError::InvalidConfig {
                code: self.code(),
                reason: e.to_string(),
            }
        })
    }

    /// Best pool matched by any submitted candidate. Every candidate is
    /// compared against every entry of both pools.
    fn best_match(&self, request: &AuthRequest, config: &PasswordConfig) -> Option<Pool> {
        let mut best = None;
        for candidate in request.field_values(PASSWORD_FIELD) {
            let access = self.hash_access_password(candidate);
            let auth = self.hash_auth_password(candidate);
            let access_hit = config
                .passwords
                .iter()
                .fold(false, |hit, stored| hit | constant_time_eq(stored, &access));
            let auth_hit = config
                .auth_passwords
                .iter()
                .fold(false, |hit, stored| hit | constant_time_eq(stored, &auth));
            if auth_hit {
                best = Some(Pool::Auth);
            } else if access_hit && best.is_none() {
                best = Some(Pool::Access);
            }
        }
        best
    }
}

impl ProtectionKind for PasswordProtection {
    fn code(&self) -> ProtectionCode {
        ProtectionCode::new("password")
    }

    fn name(&self) -> &str {
        "Password"
    }

    fn ptype(&self) -> ProtectionType {
        ProtectionType::ACCESS_CONTROL | ProtectionType::AUTHENTICATION | ProtectionType::PASSWORD
    }

    fn strength_range(&self) -> StrengthRange {
        StrengthRange::new(0, AUTH_STRENGTH)
    }

    fn validate_config(&self, config: &ProtectionConfig) -> Result<(), ProtectionError> {
        let parsed = self.parse(config)?;
        if parsed.passwords.is_empty() && parsed.auth_passwords.is_empty() {
            return Err(ProtectionError::InvalidConfig {
                code: self.code(),
                reason: "at least one password is required".to_string(),
            });
        }
        let malformed = parsed
            .passwords
            .iter()
            .chain(parsed.auth_passwords.iter())
            .any(|hash| hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()));
        if malformed {
            return Err(ProtectionError::InvalidConfig {
                code: self.code(),
                reason: "passwords must be stored as salted hashes".to_string(),
            });
        }
        Ok(())
    }

    fn configured_strength(&self, config: &ProtectionConfig) -> StrengthRange {
        match self.parse(config) {
            Ok(parsed) if !parsed.auth_passwords.is_empty() => StrengthRange::new(0, AUTH_STRENGTH),
            _ => StrengthRange::new(0, ACCESS_STRENGTH),
        }
    }

    fn evaluate(
        &self,
        request: &AuthRequest,
        assignment: &AssignedProtection,
    ) -> Result<ProtectionOutcome, ProtectionError> {
        let config = self.parse(&assignment.data)?;
        Ok(match self.best_match(request, &config) {
            Some(Pool::Auth) => ProtectionOutcome::Pass(AUTH_STRENGTH),
            Some(Pool::Access) => ProtectionOutcome::Pass(ACCESS_STRENGTH),
            None => ProtectionOutcome::Fail,
        })
    }

    fn audit(
        &self,
        request: &AuthRequest,
        assignment: &AssignedProtection,
        outcome: &ProtectionOutcome,
    ) -> Option<AuditEntry> {
        let audit_enabled = assignment
            .data
            .get("audit")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if !audit_enabled || request.field_values(PASSWORD_FIELD).is_empty() {
            return None;
        }
        Some(AuditEntry {
            at: Utc::now(),
            client_ip: request.client_ip.map(|ip| ip.to_string()),
            success: outcome.is_pass(),
            note: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::component::ComponentId;
    use crate::domain::protection::ProtectionState;

    fn assignment(kind: &PasswordProtection, audit: bool) -> AssignedProtection {
        let mut assignment =
            AssignedProtection::new(ComponentId::new(), kind.code(), ProtectionState::Enabled);
        assignment.data = kind.config_from_clear(&["open sesame"], &["root pass"], audit);
        assignment
    }

    #[test]
    fn test_two_pools() {
        let kind = PasswordProtection::new("secret");
        let assignment = assignment(&kind, false);
        assert!(kind.validate_config(&assignment.data).is_ok());

        let access = AuthRequest::new().with_field(PASSWORD_FIELD, "open sesame");
        assert_eq!(kind.evaluate(&access, &assignment).unwrap(), ProtectionOutcome::Pass(2));

        let auth = AuthRequest::new().with_field(PASSWORD_FIELD, "root pass");
        assert_eq!(kind.evaluate(&auth, &assignment).unwrap(), ProtectionOutcome::Pass(4));

        let wrong = AuthRequest::new().with_field(PASSWORD_FIELD, "nope");
        assert_eq!(kind.evaluate(&wrong, &assignment).unwrap(), ProtectionOutcome::Fail);
        assert_eq!(kind.evaluate(&AuthRequest::new(), &assignment).unwrap(), ProtectionOutcome::Fail);
    }

    #[test]
    fn test_pools_use_distinct_salts() {
        let kind = PasswordProtection::new("secret");
        assert_ne!(kind.hash_access_password("x"), kind.hash_auth_password("x"));

        // an access password placed in the auth pool does not authenticate
        let mut assignment =
            AssignedProtection::new(ComponentId::new(), kind.code(), ProtectionState::Enabled);
        assignment.data = ProtectionConfig::new();
        assignment.data.insert(
            "auth_passwords".into(),
            serde_json::json!([kind.hash_access_password("x")]),
        );
        let request = AuthRequest::new().with_field(PASSWORD_FIELD, "x");
        assert_eq!(kind.evaluate(&request, &assignment).unwrap(), ProtectionOutcome::Fail);
    }

    #[test]
    fn test_configured_strength_depends_on_pools() {
        let kind = PasswordProtection::new("secret");
        let access_only = kind.config_from_clear(&["a"], &[], false);
        assert_eq!(kind.configured_strength(&access_only).max, ACCESS_STRENGTH);
        let with_auth = kind.config_from_clear(&["a"], &["b"], false);
        assert_eq!(kind.configured_strength(&with_auth).max, AUTH_STRENGTH);
    }

    #[test]
    fn test_clear_text_config_rejected() {
        let kind = PasswordProtection::new("secret");
        let mut config = ProtectionConfig::new();
        config.insert("passwords".into(), serde_json::json!(["plain"]));
        assert!(kind.validate_config(&config).is_err());
        assert!(kind.validate_config(&ProtectionConfig::new()).is_err());
    }

    #[test]
    fn test_audit_never_records_password() {
        let kind = PasswordProtection::new("secret");
        let assignment = assignment(&kind, true);
        let request = AuthRequest::new()
            .with_client_ip("192.0.2.1".parse().unwrap())
            .with_field(PASSWORD_FIELD, "nope");
        let outcome = kind.evaluate(&request, &assignment).unwrap();
        let entry = kind.audit(&request, &assignment, &outcome).unwrap();
        assert!(!entry.success);
        assert_eq!(entry.client_ip.as_deref(), Some("192.0.2.1"));
        assert!(!serde_json::to_string(&entry).unwrap().contains("nope"));

        let silent = self::assignment(&kind, false);
        assert!(kind.audit(&request, &silent, &outcome).is_none());
    }
}
