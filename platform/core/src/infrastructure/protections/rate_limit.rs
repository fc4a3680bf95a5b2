// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

// Rate limit protection
//
// Side-effect kind: it runs on every evaluation, records the attempt in a
// keyed GCRA limiter (component + caller) and never counts as a pass. Once
// the quota is exhausted the endpoint is disguised as missing.

use std::num::NonZeroU32;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::domain::auth::AuthRequest;
use crate::domain::platform_config::RateLimitConfig;
use crate::domain::protection::{
    AssignedProtection, ProtectionCode, ProtectionError, ProtectionKind, ProtectionOutcome,
    ProtectionType, StrengthRange,
};

/// Keys kept before idle entries are pruned.
const PRUNE_THRESHOLD: usize = 10_000;

pub struct RateLimitProtection {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl std::fmt::Debug for RateLimitProtection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitProtection")
            .field("keys", &self.limiter.len())
            .finish()
    }
}

impl RateLimitProtection {
    pub fn new(config: &RateLimitConfig) -> Self {
        let per_minute = NonZeroU32::new(config.attempts_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute).allow_burst(burst);
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }
}

impl ProtectionKind for RateLimitProtection {
    fn code(&self) -> ProtectionCode {
        ProtectionCode::new("ratelimit")
    }

    fn name(&self) -> &str {
        "Rate limit"
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

    fn evaluate(
        &self,
        request: &AuthRequest,
        assignment: &AssignedProtection,
    ) -> Result<ProtectionOutcome, ProtectionError> {
        if self.limiter.len() > PRUNE_THRESHOLD {
            self.limiter.retain_recent();
        }
        let key = format!("{}:{}", assignment.component_id, request.caller_key());
        match self.limiter.check_key(&key) {
            Ok(()) => Ok(ProtectionOutcome::Pass(0)),
            Err(_) => {
                tracing::info!(component = %assignment.component_id, "Rate limit exceeded");
                Ok(ProtectionOutcome::Disguise)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::component::ComponentId;
    use crate::domain::protection::ProtectionState;

    #[test]
    fn test_burst_then_disguise() {
        let kind = RateLimitProtection::new(&RateLimitConfig {
            attempts_per_minute: 1,
            burst: 3,
        });
        let assignment = AssignedProtection::new(ComponentId::new(), kind.code(), ProtectionState::Enabled);
        let request = AuthRequest::new().with_client_ip("198.51.100.7".parse().unwrap());

        for _ in 0..3 {
            assert_eq!(kind.evaluate(&request, &assignment).unwrap(), ProtectionOutcome::Pass(0));
        }
        assert_eq!(kind.evaluate(&request, &assignment).unwrap(), ProtectionOutcome::Disguise);

        // other callers and other components have their own budget
        let other = AuthRequest::new().with_client_ip("198.51.100.8".parse().unwrap());
        assert_eq!(kind.evaluate(&other, &assignment).unwrap(), ProtectionOutcome::Pass(0));
        let elsewhere = AssignedProtection::new(ComponentId::new(), kind.code(), ProtectionState::Enabled);
        assert_eq!(kind.evaluate(&request, &elsewhere).unwrap(), ProtectionOutcome::Pass(0));
    }
}
