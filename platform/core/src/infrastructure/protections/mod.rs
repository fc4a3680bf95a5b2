// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Built-in protection kinds and the startup registration table.
//!
//! | Code | Kind | ptype | Strength |
//! |------|------|-------|----------|
//! | `allow` | [`AllowProtection`] | a | 1 |
//! | `captcha` | [`CaptchaProtection`] | a, b | 0-1 |
//! | `friends` | [`FriendsProtection`] | a | 3 |
//! | `password` | [`PasswordProtection`] | a, b, password | 2 / 4 |
//! | `randomfail` | [`RandomFailProtection`] | a, b, side effects, no count | 0 |
//! | `ratelimit` | [`RateLimitProtection`] | a, b, side effects, no count | 0 |

pub mod allow;
pub mod captcha;
pub mod friends;
pub mod password;
pub mod random_fail;
pub mod rate_limit;

use std::sync::Arc;

pub use allow::AllowProtection;
pub use captcha::CaptchaProtection;
pub use friends::FriendsProtection;
pub use password::PasswordProtection;
pub use random_fail::RandomFailProtection;
pub use rate_limit::RateLimitProtection;

use crate::domain::catalog::{CatalogError, ProtectionCatalog};
use crate::domain::platform_config::PlatformConfigSpec;

/// Register every built-in kind. Called once while the process starts.
pub fn register_builtin_kinds(
    catalog: &mut ProtectionCatalog,
    spec: &PlatformConfigSpec,
    secret_key: &str,
) -> Result<(), CatalogError> {
    catalog.register(Arc::new(AllowProtection))?;
    catalog.register(Arc::new(CaptchaProtection))?;
    catalog.register(Arc::new(FriendsProtection))?;
    catalog.register(Arc::new(PasswordProtection::new(secret_key)))?;
    catalog.register(Arc::new(RandomFailProtection::new()))?;
    catalog.register(Arc::new(RateLimitProtection::new(&spec.rate_limit)))?;
    Ok(())
}

pub fn builtin_catalog(spec: &PlatformConfigSpec, secret_key: &str) -> Result<ProtectionCatalog, CatalogError> {
    let mut catalog = ProtectionCatalog::new();
    register_builtin_kinds(&mut catalog, spec, secret_key)?;
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::protection::{ProtectionCode, ProtectionType};

    #[test]
    fn test_builtin_catalog() {
        let catalog = builtin_catalog(&PlatformConfigSpec::default(), "secret").unwrap();
        assert_eq!(catalog.len(), 6);

        let codes: Vec<_> = catalog
            .list(ProtectionType::NONE)
            .map(|k| k.code().0)
            .collect();
        assert_eq!(codes, ["allow", "captcha", "friends", "password", "randomfail", "ratelimit"]);

        let auth: Vec<_> = catalog
            .list(ProtectionType::AUTHENTICATION)
            .map(|k| k.code().0)
            .collect();
        assert_eq!(auth, ["captcha", "password", "randomfail", "ratelimit"]);

        assert!(catalog.get(&ProtectionCode::new("nope")).is_err());
    }

    #[test]
    fn test_double_registration_fails() {
        let mut catalog = builtin_catalog(&PlatformConfigSpec::default(), "secret").unwrap();
        let err = register_builtin_kinds(&mut catalog, &PlatformConfigSpec::default(), "secret").unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateKind(code) if code.as_str() == "allow"));
    }
}
