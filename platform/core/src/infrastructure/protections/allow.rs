// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::auth::AuthRequest;
use crate::domain::protection::{
    AssignedProtection, ProtectionCode, ProtectionError, ProtectionKind, ProtectionOutcome,
    ProtectionType, StrengthRange,
};

/// Always passes with strength 1.
#[derive(Debug, Default)]
pub struct AllowProtection;

impl ProtectionKind for AllowProtection {
    fn code(&self) -> ProtectionCode {
        ProtectionCode::new("allow")
    }

    fn name(&self) -> &str {
        "Allow"
    }

    fn ptype(&self) -> ProtectionType {
        ProtectionType::ACCESS_CONTROL
    }

    fn strength_range(&self) -> StrengthRange {
        StrengthRange::new(0, 1)
    }

    fn evaluate(
        &self,
        _request: &AuthRequest,
        _assignment: &AssignedProtection,
    ) -> Result<ProtectionOutcome, ProtectionError> {
        Ok(ProtectionOutcome::Pass(1))
    }
}
