// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

// Random fail protection
//
// Disguises a configurable share of attempts as "not found" so that probing
// clients cannot reliably tell existing endpoints from missing ones.
// Configuration: `{"fail_percent": 0..=100}` (default 10).

use std::sync::Arc;

use rand_core::{OsRng, RngCore};

use crate::domain::auth::AuthRequest;
use crate::domain::protection::{
    AssignedProtection, ProtectionCode, ProtectionConfig, ProtectionError, ProtectionKind,
    ProtectionOutcome, ProtectionType, StrengthRange,
};

pub const DEFAULT_FAIL_PERCENT: u64 = 10;

/// Source of rolls in `0..100`.
pub type Roll = Arc<dyn Fn() -> u64 + Send + Sync>;

pub struct RandomFailProtection {
    roll: Roll,
}

impl std::fmt::Debug for RandomFailProtection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomFailProtection").finish_non_exhaustive()
    }
}

impl Default for RandomFailProtection {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomFailProtection {
    pub fn new() -> Self {
        Self::with_roll(Arc::new(|| OsRng.next_u64() % 100))
    }

    pub fn with_roll(roll: Roll) -> Self {
        Self { roll }
    }

    fn fail_percent(&self, config: &ProtectionConfig) -> Result<u64, ProtectionError> {
        match config.get("fail_percent") {
            None => Ok(DEFAULT_FAIL_PERCENT),
            Some(value) => value
                .as_u64()
                .filter(|p| *p <= 100)
                .ok_or_else(|| ProtectionError::InvalidConfig {
                    code: self.code(),
                    reason: "fail_percent must be an integer between 0 and 100".to_string(),
                }),
        }
    }
}

impl ProtectionKind for RandomFailProtection {
    fn code(&self) -> ProtectionCode {
        ProtectionCode::new("randomfail")
    }

    fn name(&self) -> &str {
        "Random fail"
    }

    fn ptype(&self) -> ProtectionType {
        ProtectionType::ACCESS_CONTROL
            | ProtectionType::AUTHENTICATION
            | ProtectionType::SIDE_EFFECTS
            | ProtectionType::NO_COUNT
    }

    fn strength_range(&self) -> StrengthRange {
        StrengthRange::new(0, 0)
    }

    fn validate_config(&self, config: &ProtectionConfig) -> Result<(), ProtectionError> {
        self.fail_percent(config).map(|_| ())
    }

    fn evaluate(
        &self,
        _request: &AuthRequest,
        assignment: &AssignedProtection,
    ) -> Result<ProtectionOutcome, ProtectionError> {
        let fail_percent = self.fail_percent(&assignment.data)?;
        if (self.roll)() < fail_percent {
            Ok(ProtectionOutcome::Disguise)
        } else {
            Ok(ProtectionOutcome::Pass(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::component::ComponentId;
    use crate::domain::protection::ProtectionState;
    use serde_json::json;

    fn assignment(data: serde_json::Value) -> AssignedProtection {
        AssignedProtection::new(ComponentId::new(), ProtectionCode::new("randomfail"), ProtectionState::Enabled)
            .with_data(data)
    }

    #[test]
    fn test_roll_below_percent_disguises() {
        let low = RandomFailProtection::with_roll(Arc::new(|| 5));
        let high = RandomFailProtection::with_roll(Arc::new(|| 50));
        let request = AuthRequest::new();
        let default_config = assignment(json!({}));

        assert_eq!(low.evaluate(&request, &default_config).unwrap(), ProtectionOutcome::Disguise);
        assert_eq!(high.evaluate(&request, &default_config).unwrap(), ProtectionOutcome::Pass(0));

        let never = assignment(json!({ "fail_percent": 0 }));
        assert_eq!(low.evaluate(&request, &never).unwrap(), ProtectionOutcome::Pass(0));
        let always = assignment(json!({ "fail_percent": 100 }));
        assert_eq!(high.evaluate(&request, &always).unwrap(), ProtectionOutcome::Disguise);
    }

    #[test]
    fn test_percent_validation() {
        let kind = RandomFailProtection::new();
        assert!(kind.validate_config(&assignment(json!({ "fail_percent": 101 })).data).is_err());
        assert!(kind.validate_config(&assignment(json!({ "fail_percent": "ten" })).data).is_err());
        assert!(kind.validate_config(&assignment(json!({ "fail_percent": 25 })).data).is_ok());
    }

    #[test]
    fn test_os_roll_in_range() {
        let kind = RandomFailProtection::new();
        for _ in 0..100 {
            assert!((kind.roll)() < 100);
        }
    }
}
