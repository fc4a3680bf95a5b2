// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Protection Strength
//!
//! Strength is a small integer (0-10) describing how hard it is to reach a
//! component or content. Component strength is recomputed from its assigned
//! protections every time they change:
//!
//! ```text
//! reserved (index/fake_index): 10
//! otherwise: (public ? 0 : 5) + protection_strength
//!
//! protection_strength:
//!   required_passes == 0                  -> 0
//!   required_passes > 0, no protections   -> 4   (login/token only)
//!   otherwise -> min(round(mean(lowest `required_passes` strengths)), 3)
//!   then max() with the strongest instant-fail protection
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::protection::{ProtectionState, StrengthRange};

/// Maximum strength any component can reach.
pub const MAX_STRENGTH: u8 = 10;
/// Strength contributed by a private component.
pub const PRIVATE_STRENGTH: u8 = 5;
/// Protection strength of a component that requires passes but has no protection.
pub const LOGIN_ONLY_STRENGTH: u8 = 4;
/// Cap of the averaged regular protections.
pub const AVERAGED_CAP: u8 = 3;
/// `max_prot_strength` threshold enabling component authentication.
pub const CAN_AUTH_STRENGTH: u8 = 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StrengthError {
    #[error("insufficient strength: required {required}, have {actual}")]
    Insufficient { required: u8, actual: u8 },
}

/// Computed protection contribution of a component's assignments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionStrength {
    /// Contribution to the component strength.
    pub strength: u8,
    /// Strongest single protection (decides `can_auth`).
    pub max_strength: u8,
}

/// Reduce the assigned protections (state and configured strength) of a
/// component to its protection strength.
pub fn calculate_protection_strength(
    required_passes: u32,
    protections: &[(ProtectionState, StrengthRange)],
) -> ProtectionStrength {
    let mut regular: Vec<u8> = Vec::new();
    let mut instant_fail = 0u8;
    let mut max_strength = 0u8;

    for (state, range) in protections {
        match state {
            ProtectionState::Disabled => continue,
            ProtectionState::InstantFail => instant_fail = instant_fail.max(range.max),
            ProtectionState::Enabled => regular.push(range.max),
        }
        max_strength = max_strength.max(range.max);
    }

    if required_passes == 0 {
        return ProtectionStrength {
            strength: 0,
            max_strength,
        };
    }

    if regular.is_empty() && instant_fail == 0 {
        return ProtectionStrength {
            strength: LOGIN_ONLY_STRENGTH,
            max_strength,
        };
    }

    regular.sort_unstable();
    let take = regular.len().min(required_passes as usize);
    let averaged = if take == 0 {
        0
    } else {
        let sum: u32 = regular[..take].iter().map(|s| u32::from(*s)).sum();
        let mean = f64::from(sum) / take as f64;
        (mean.round() as u8).min(AVERAGED_CAP)
    };

    ProtectionStrength {
        strength: averaged.max(instant_fail),
        max_strength,
    }
}

/// Strength of a non-reserved component.
pub fn component_strength(public: bool, protection: ProtectionStrength) -> u8 {
    let base = if public { 0 } else { PRIVATE_STRENGTH };
    (base + protection.strength).min(MAX_STRENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(max: u8) -> (ProtectionState, StrengthRange) {
        (ProtectionState::Enabled, StrengthRange::new(0, max))
    }

    #[test]
    fn test_no_required_passes_is_zero() {
        let ps = calculate_protection_strength(0, &[enabled(4)]);
        assert_eq!(ps.strength, 0);
        assert_eq!(ps.max_strength, 4);
    }

    #[test]
    fn test_required_passes_without_protections() {
        let ps = calculate_protection_strength(1, &[]);
        assert_eq!(ps.strength, LOGIN_ONLY_STRENGTH);
        let disabled = [(ProtectionState::Disabled, StrengthRange::new(0, 4))];
        assert_eq!(calculate_protection_strength(2, &disabled).strength, LOGIN_ONLY_STRENGTH);
    }

    #[test]
    fn test_mean_of_lowest_is_capped() {
        let ps = calculate_protection_strength(2, &[enabled(4), enabled(1), enabled(2)]);
        // lowest two: 1, 2 -> mean 1.5 -> 2
        assert_eq!(ps.strength, 2);
        let ps = calculate_protection_strength(3, &[enabled(4), enabled(4), enabled(4)]);
        assert_eq!(ps.strength, AVERAGED_CAP);
        assert_eq!(ps.max_strength, 4);
    }

    #[test]
    fn test_instant_fail_raises_floor() {
        let protections = [enabled(1), (ProtectionState::InstantFail, StrengthRange::new(0, 4))];
        let ps = calculate_protection_strength(1, &protections);
        assert_eq!(ps.strength, 4);
    }

    #[test]
    fn test_component_strength_private_bonus() {
        let ps = ProtectionStrength { strength: 2, max_strength: 2 };
        assert_eq!(component_strength(true, ps), 2);
        assert_eq!(component_strength(false, ps), 7);
    }
}
