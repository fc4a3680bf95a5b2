// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::auth::AuthRequest;
use crate::domain::protection::{
    AssignedProtection, ChallengeFieldKind, ChallengeForm, ProtectionCode, ProtectionError,
    ProtectionKind, ProtectionOutcome, ProtectionType, StrengthRange,
};
use crate::infrastructure::crypto::constant_time_eq;

pub const CAPTCHA_CODE: &str = "captcha";
pub const CAPTCHA_FIELD: &str = "captcha";

/// Session-bound challenge. The server draws the answer into the session
/// when it hands out the challenge; it must be echoed back in the `captcha`
/// field. Until then the kind asks for it with a form.
#[derive(Debug, Default)]
pub struct CaptchaProtection;

impl CaptchaProtection {
    fn form(&self) -> ChallengeForm {
        ChallengeForm::new(self.code(), "Captcha").with_field(
            CAPTCHA_FIELD,
            ChallengeFieldKind::Text,
            Some("Solve the challenge"),
        )
    }
}

impl ProtectionKind for CaptchaProtection {
    fn code(&self) -> ProtectionCode {
        ProtectionCode::new(CAPTCHA_CODE)
    }

    fn name(&self) -> &str {
        "Captcha"
    }

    fn ptype(&self) -> ProtectionType {
        ProtectionType::ACCESS_CONTROL | ProtectionType::AUTHENTICATION
    }

    fn strength_range(&self) -> StrengthRange {
        StrengthRange::new(0, 1)
    }

    fn evaluate(
        &self,
        request: &AuthRequest,
        _assignment: &AssignedProtection,
    ) -> Result<ProtectionOutcome, ProtectionError> {
        let (Some(expected), Some(answer)) =
            (request.session.captcha_solution.as_deref(), request.field(CAPTCHA_FIELD))
        else {
            return Ok(ProtectionOutcome::Pending(self.form()));
        };
        let answer = answer.trim().to_lowercase();
        if constant_time_eq(&expected.to_lowercase(), &answer) {
            Ok(ProtectionOutcome::Pass(1))
        } else {
            Ok(ProtectionOutcome::Pending(self.form()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::component::ComponentId;
    use crate::domain::protection::ProtectionState;

    #[test]
    fn test_pending_until_solved() {
        let kind = CaptchaProtection;
        let assignment = AssignedProtection::new(ComponentId::new(), kind.code(), ProtectionState::Enabled);

        let fresh = AuthRequest::new();
        assert!(matches!(kind.evaluate(&fresh, &assignment).unwrap(), ProtectionOutcome::Pending(_)));

        let mut wrong = AuthRequest::new().with_field(CAPTCHA_FIELD, "xyz");
        wrong.session.captcha_solution = Some("AbC".into());
        assert!(matches!(kind.evaluate(&wrong, &assignment).unwrap(), ProtectionOutcome::Pending(_)));

        let mut right = AuthRequest::new().with_field(CAPTCHA_FIELD, " abc ");
        right.session.captcha_solution = Some("AbC".into());
        assert_eq!(kind.evaluate(&right, &assignment).unwrap(), ProtectionOutcome::Pass(1));
    }
}
