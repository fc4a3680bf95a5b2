// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

use serde::Deserialize;
use uuid::Uuid;

use crate::domain::auth::AuthRequest;
use crate::domain::protection::{
    AssignedProtection, ProtectionCode, ProtectionConfig, ProtectionError, ProtectionKind,
    ProtectionOutcome, ProtectionType, StrengthRange,
};

const FRIEND_STRENGTH: u8 = 3;

#[derive(Debug, Default, Deserialize)]
struct FriendsConfig {
    #[serde(default)]
    users: Vec<Uuid>,
}

/// Passes with strength 3 if the caller is one of the listed users.
///
/// Configuration: `{"users": ["<user uuid>", ...]}`
#[derive(Debug, Default)]
pub struct FriendsProtection;

impl FriendsProtection {
    fn parse(&self, config: &ProtectionConfig) -> Result<FriendsConfig, ProtectionError> {
        serde_json::from_value(serde_json::Value::Object(config.clone())).map_err(|e| {
            ProtectionError::InvalidConfig {
                code: self.code(),
                reason: e.to_string(),
            }
        })
    }
}

impl ProtectionKind for FriendsProtection {
    fn code(&self) -> ProtectionCode {
        ProtectionCode::new("friends")
    }

    fn name(&self) -> &str {
        "Friends"
    }

    fn ptype(&self) -> ProtectionType {
        ProtectionType::ACCESS_CONTROL
    }

    fn strength_range(&self) -> StrengthRange {
        StrengthRange::new(0, FRIEND_STRENGTH)
    }

    fn validate_config(&self, config: &ProtectionConfig) -> Result<(), ProtectionError> {
        self.parse(config).map(|_| ())
    }

    fn evaluate(
        &self,
        request: &AuthRequest,
        assignment: &AssignedProtection,
    ) -> Result<ProtectionOutcome, ProtectionError> {
        let Some(identity) = request.identity else {
            return Ok(ProtectionOutcome::Fail);
        };
        let config = self.parse(&assignment.data)?;
        if config.users.contains(&identity.0) {
            Ok(ProtectionOutcome::Pass(FRIEND_STRENGTH))
        } else {
            Ok(ProtectionOutcome::Fail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::component::ComponentId;
    use crate::domain::protection::ProtectionState;
    use crate::domain::user::UserId;
    use serde_json::json;

    #[test]
    fn test_listed_user_passes() {
        let friend = UserId::new();
        let kind = FriendsProtection;
        let assignment = AssignedProtection::new(ComponentId::new(), kind.code(), ProtectionState::Enabled)
            .with_data(json!({ "users": [friend.0] }));

        let outcome = kind.evaluate(&AuthRequest::new().with_identity(friend), &assignment).unwrap();
        assert_eq!(outcome, ProtectionOutcome::Pass(3));

        let stranger = kind
            .evaluate(&AuthRequest::new().with_identity(UserId::new()), &assignment)
            .unwrap();
        assert_eq!(stranger, ProtectionOutcome::Fail);

        let anonymous = kind.evaluate(&AuthRequest::new(), &assignment).unwrap();
        assert_eq!(anonymous, ProtectionOutcome::Fail);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let kind = FriendsProtection;
        let config = json!({ "users": ["not-a-uuid"] });
        let serde_json::Value::Object(map) = config else { unreachable!() };
        assert!(matches!(
            kind.validate_config(&map),
            Err(ProtectionError::InvalidConfig { .. })
        ));
    }
}
