// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end authorization through the assembled services: access to
//! regular components, logins against the reserved gate and listing
//! visibility.

mod common;

use common::{open_component, services, user_with_login, LOGIN_PASSWORD};
use spider_core::application::AccessError;
use spider_core::domain::auth::{AuthRequest, ProtectionSelection};
use spider_core::domain::component::{FAKE_INDEX_NAME, INDEX_NAME};
use spider_core::domain::protection::ProtectionCode;

#[tokio::test]
async fn test_public_home_with_allow_is_granted() {
    let services = services().await;
    let user = services.components.signup("alice").await.unwrap();
    let home = open_component(&services, &user, "home").await;
    assert_eq!(home.required_passes, 0);

    let grant = services
        .access
        .authorize("alice", "home", &AuthRequest::new(), &ProtectionSelection::All)
        .await
        .unwrap();
    assert_eq!(grant.component.id, home.id);
    assert_eq!(grant.strength, 1);
}

#[tokio::test]
async fn test_index_without_protections_denies_login() {
    let services = services().await;
    services.components.signup("bob").await.unwrap();

    let err = services.access.login("bob", AuthRequest::new()).await.unwrap_err();
    assert!(matches!(err, AccessError::Forbidden));
}

#[tokio::test]
async fn test_login_with_password() {
    let services = services().await;
    let user = user_with_login(&services, "carol", &[]).await;

    let err = services.access.login("carol", AuthRequest::new()).await.unwrap_err();
    match err {
        AccessError::Challenge(forms) => {
            assert_eq!(forms[0].code, ProtectionCode::new("_password"));
            assert!(forms[0].fields.iter().any(|field| field.name == "password"));
        }
        other => panic!("expected a challenge, got {other:?}"),
    }

    let outcome = services
        .access
        .login("carol", AuthRequest::new().with_field("password", LOGIN_PASSWORD))
        .await
        .unwrap();
    assert_eq!(outcome.user.id, user.id);
    assert_eq!(outcome.root.name, INDEX_NAME);
    assert_eq!(outcome.strength, 4);
    assert!(outcome.continue_login);
    assert!(!outcome.session.is_fake);
    assert_eq!(outcome.session.password_hashes.len(), 1);
}

#[tokio::test]
async fn test_unknown_and_reserved_components_look_missing() {
    let services = services().await;
    let user = services.components.signup("dave").await.unwrap();

    for name in ["nothing-here", INDEX_NAME, FAKE_INDEX_NAME] {
        let err = services
            .access
            .authorize("dave", name, &AuthRequest::new(), &ProtectionSelection::All)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::NotFound), "{name}");
    }

    let err = services
        .access
        .authorize("nobody", "home", &AuthRequest::new(), &ProtectionSelection::All)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::NotFound));

    // the owner addresses the reserved gate; it still has no access protections
    let err = services
        .access
        .authorize(
            "dave",
            INDEX_NAME,
            &AuthRequest::new().with_identity(user.id),
            &ProtectionSelection::All,
        )
        .await
        .unwrap_err();
    assert!(!matches!(err, AccessError::NotFound));
}

#[tokio::test]
async fn test_deletion_requested_component_is_hidden() {
    let services = services().await;
    let user = services.components.signup("erin").await.unwrap();
    let home = open_component(&services, &user, "home").await;
    services
        .contents
        .create(home.id, "text", "note")
        .await
        .unwrap();
    services.components.request_deletion(home.id).await.unwrap();

    let err = services
        .access
        .authorize("erin", "home", &AuthRequest::new(), &ProtectionSelection::All)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::NotFound));
}

#[tokio::test]
async fn test_listing_visibility() {
    let services = services().await;
    let user = services.components.signup("fay").await.unwrap();
    open_component(&services, &user, "home").await;
    services.components.create_component(user.id, "private").await.unwrap();

    let stranger = services
        .access
        .list_visible_components("fay", &AuthRequest::new())
        .await
        .unwrap();
    let names: Vec<_> = stranger.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["home"]);

    let owner = services
        .access
        .list_visible_components("fay", &AuthRequest::new().with_identity(user.id))
        .await
        .unwrap();
    assert_eq!(owner.len(), 4);
}
