// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP surface driven through `tower::ServiceExt::oneshot`.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use common::{access_passwords, guarded_component, open_component, services, user_with_login, LOGIN_PASSWORD};
use serde_json::{json, Map, Value};
use spider_core::presentation::api::SESSION_HEADER;
use spider_core::presentation::app;
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    post_json_in(uri, None, body)
}

fn post_json_in(uri: &str, session: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(session) = session {
        builder = builder.header(SESSION_HEADER, session);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn session_of(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(SESSION_HEADER)
        .expect("session header")
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_health() {
    let router = app(services().await);
    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_component_listing_and_token() {
    let services = services().await;
    let user = services.components.signup("pia").await.unwrap();
    let home = open_component(&services, &user, "home").await;
    services.contents.create(home.id, "text", "readme").await.unwrap();
    let router = app(services);

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/api/components/pia/home").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["component"], "home");
    assert_eq!(body["strength"], 1);
    assert_eq!(body["contents"][0]["name"], "readme");

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/components/pia/home?intention=auth")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let token = body_json(response).await["token"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/tokens/{token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router
        .oneshot(post_json("/api/tokens/renew", json!({ "token": token })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_mapping() {
    let services = services().await;
    let user = services.components.signup("quin").await.unwrap();
    open_component(&services, &user, "home").await;
    let router = app(services);

    let status = |uri: &'static str| {
        let router = router.clone();
        async move {
            router
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap()
                .status()
        }
    };

    assert_eq!(status("/api/components/quin/missing").await, StatusCode::NOT_FOUND);
    assert_eq!(status("/api/components/quin/index").await, StatusCode::NOT_FOUND);
    assert_eq!(
        status("/api/components/quin/home?intention=bogus").await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        status("/api/components/quin/home?intention=auth&intention=payment").await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        status("/api/components/quin/home?referrer=ftp%3A%2F%2Fshop.example%2F").await,
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn test_login_challenge_then_success() {
    let services = services().await;
    user_with_login(&services, "rita", &[]).await;
    let router = app(services);

    let response = router
        .clone()
        .oneshot(post_json("/api/login/rita", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["forms"][0]["fields"][0]["name"], "password");

    let response = router
        .oneshot(post_json(
            "/api/login/rita",
            json!({ "fields": { "password": LOGIN_PASSWORD } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session = session_of(&response);
    let body = body_json(response).await;
    assert_eq!(body["continue"], true);
    assert_eq!(body["strength"], 4);
    assert_eq!(body["session"], session.as_str());
}

#[tokio::test]
async fn test_client_cannot_supply_session_state() {
    let services = services().await;
    let user = services.components.signup("sven").await.unwrap();
    guarded_component(&services, &user, "vault", "captcha", Map::new()).await;
    let router = app(services);

    // session state in the body is ignored
    let forged = json!({
        "fields": { "captcha": "x" },
        "session": { "captcha_solution": "x", "is_fake": false, "password_hashes": [] }
    });
    let response = router
        .clone()
        .oneshot(post_json("/api/components/sven/vault", forged.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // a made-up session id opens a fresh session instead
    let response = router
        .clone()
        .oneshot(post_json_in("/api/components/sven/vault", Some("made-up"), forged))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let session = session_of(&response);
    assert_ne!(session, "made-up");
    let challenge = body_json(response).await["captcha"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(post_json_in(
            "/api/components/sven/vault",
            Some(&session),
            json!({ "fields": { "captcha": challenge } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // the answer is spent once used
    let response = router
        .oneshot(post_json_in(
            "/api/components/sven/vault",
            Some(&session),
            json!({ "fields": { "captcha": challenge } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_capability_token_grants_access() {
    let services = services().await;
    let user = services.components.signup("tom").await.unwrap();
    let vault = guarded_component(&services, &user, "vault", "password", access_passwords(&["open sesame"])).await;
    services.contents.create(vault.id, "text", "ledger").await.unwrap();
    let router = app(services);

    let response = router.clone().oneshot(get("/api/components/tom/vault")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .clone()
        .oneshot(post_json(
            "/api/components/tom/vault?intention=auth",
            json!({ "fields": { "password": "open sesame" } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let token = body["token"].as_str().unwrap().to_string();
    let strength = body["strength"].clone();

    let response = router
        .clone()
        .oneshot(get(&format!("/api/components/tom/vault?token={token}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["component"], "vault");
    assert_eq!(body["strength"], strength);
    assert_eq!(body["contents"][0]["name"], "ledger");

    let response = router
        .clone()
        .oneshot(get(&format!("/api/components/tom/vault?token={token}&intention=payment")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router
        .clone()
        .oneshot(get("/api/components/tom/vault?token=not-a-real-token"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/tokens/{token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router
        .oneshot(get(&format!("/api/components/tom/vault?token={token}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
