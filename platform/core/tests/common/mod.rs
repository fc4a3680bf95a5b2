// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use spider_core::application::SpiderServices;
use spider_core::domain::component::{Component, INDEX_NAME};
use spider_core::domain::platform_config::PlatformConfigSpec;
use spider_core::domain::protection::{AssignedProtection, ProtectionCode, ProtectionConfig, ProtectionState};
use spider_core::domain::user::User;
use spider_core::infrastructure::protections::PasswordProtection;
use spider_core::infrastructure::{HttpReferrerClient, Repositories};

pub const SECRET: &str = "integration-secret";
pub const LOGIN_PASSWORD: &str = "correct horse";

pub fn test_spec() -> PlatformConfigSpec {
    let mut spec = PlatformConfigSpec::default();
    spec.security.secret_key = SECRET.to_string();
    spec.referrer.allow_insecure_http = true;
    spec
}

pub async fn services() -> SpiderServices {
    services_with(test_spec()).await
}

pub async fn services_with(spec: PlatformConfigSpec) -> SpiderServices {
    let referrer = Arc::new(HttpReferrerClient::new(&spec.referrer).expect("referrer client"));
    SpiderServices::assemble(spec, Repositories::in_memory(), referrer)
        .await
        .expect("services")
}

pub fn password_assignment(component: &Component, auth_passwords: &[&str]) -> AssignedProtection {
    let mut assignment =
        AssignedProtection::new(component.id, ProtectionCode::new("password"), ProtectionState::Enabled);
    assignment.data = PasswordProtection::new(SECRET).config_from_clear(&[], auth_passwords, false);
    assignment
}

/// Sign up `username` and protect the login gate with [`LOGIN_PASSWORD`]
/// plus any extra login passwords.
pub async fn user_with_login(services: &SpiderServices, username: &str, extra: &[&str]) -> User {
    let user = services.components.signup(username).await.expect("signup");
    let index = services
        .components
        .get_by_name(user.id, INDEX_NAME)
        .await
        .expect("index");
    let mut passwords = vec![LOGIN_PASSWORD];
    passwords.extend_from_slice(extra);
    services
        .components
        .update_protections(index.id, vec![password_assignment(&index, &passwords)], vec![])
        .await
        .expect("login protection");
    user
}

/// A public component with a single always-passing protection.
pub async fn open_component(services: &SpiderServices, user: &User, name: &str) -> Component {
    let component = services
        .components
        .create_component(user.id, name)
        .await
        .expect("component");
    services
        .components
        .set_public(component.id, true)
        .await
        .expect("public");
    let allow = AssignedProtection::new(component.id, ProtectionCode::new("allow"), ProtectionState::Enabled);
    services
        .components
        .update_protections(component.id, vec![allow], vec![])
        .await
        .expect("allow protection")
}

/// A public component guarded by one protection kind; one pass required.
pub async fn guarded_component(
    services: &SpiderServices,
    user: &User,
    name: &str,
    code: &str,
    data: ProtectionConfig,
) -> Component {
    let component = services
        .components
        .create_component(user.id, name)
        .await
        .expect("component");
    services
        .components
        .set_public(component.id, true)
        .await
        .expect("public");
    let mut assignment = AssignedProtection::new(component.id, ProtectionCode::new(code), ProtectionState::Enabled);
    assignment.data = data;
    services
        .components
        .update_protections(component.id, vec![assignment], vec![])
        .await
        .expect("protection");
    services
        .components
        .set_required_passes(component.id, 1)
        .await
        .expect("required passes")
}

/// Protection data of a password assignment accepting `access` passwords.
pub fn access_passwords(access: &[&str]) -> ProtectionConfig {
    PasswordProtection::new(SECRET).config_from_clear(access, &[], false)
}
