// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP API
//!
//! Session state (captcha answer, entered password hashes, fake-login
//! marker) stays on the server. Clients only carry the opaque id the server
//! returns in the `x-spider-session` header; an unknown id opens a new
//! session. A login moves the session to a new id. The caller identity and
//! client address come from the `x-spider-identity` and `x-forwarded-for`
//! headers set by the fronting gateway.
//!
//! | Outcome | Status |
//! |---------|--------|
//! | granted | 200 |
//! | pending forms | 401 with the forms (and a captcha challenge) |
//! | denied | 403 |
//! | disguised / not found / hidden / bad token | 404 |
//! | malformed intention or referrer | 400 |
//! | referrer handshake failed | 502 |
//! | token creation exhausted | 503 |

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, RawQuery, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

use crate::application::access_service::{AccessError, AccessGrant};
use crate::application::bootstrap::SpiderServices;
use crate::application::token_manager::IssueRequest;
use crate::domain::auth::{AuthRequest, ProtectionSelection, SessionState};
use crate::domain::content::ContentId;
use crate::domain::protection::ChallengeForm;
use crate::domain::token::{IntentionSet, TokenError};
use crate::domain::user::UserId;
use crate::infrastructure::protections::captcha::CAPTCHA_CODE;
use crate::infrastructure::session_store::SessionStore;

pub const IDENTITY_HEADER: &str = "x-spider-identity";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const SESSION_HEADER: &str = "x-spider-session";

pub struct AppState {
    pub services: SpiderServices,
}

pub fn app(services: SpiderServices) -> Router {
    let state = Arc::new(AppState { services });

    Router::new()
        .route("/health", get(health))
        .route("/api/components/{owner}/{name}", get(get_component).post(post_component))
        .route("/api/login/{owner}", post(login))
        .route("/api/tokens/renew", post(renew_token))
        .route("/api/tokens/{token}", delete(revoke_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Access(AccessError),
    Token(TokenError),
    /// Forms still to fill in; `captcha` is the challenge drawn for this
    /// session when a captcha is among them.
    Challenge {
        forms: Vec<ChallengeForm>,
        captcha: Option<String>,
    },
    BadRequest(String),
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Token(e) => ApiError::Token(e),
            AccessError::Challenge(forms) => ApiError::Challenge { forms, captcha: None },
            other => ApiError::Access(other),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        ApiError::Token(err)
    }
}

fn not_found() -> (StatusCode, Value) {
    (StatusCode::NOT_FOUND, json!({ "error": "not found" }))
}

fn internal(err: &dyn std::fmt::Display) -> (StatusCode, Value) {
    error!(error = %err, "Request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "internal error" }))
}

fn token_status(err: TokenError) -> (StatusCode, Value) {
    match err {
        TokenError::NotFound | TokenError::Expired => not_found(),
        TokenError::Creation { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "error": "token creation failed, retry later" }),
        ),
        TokenError::ReferrerHandshakeFailed { reason } => {
            (StatusCode::BAD_GATEWAY, json!({ "error": "referrer handshake failed", "reason": reason }))
        }
        e if e.is_client_error() => (StatusCode::BAD_REQUEST, json!({ "error": e.to_string() })),
        e => internal(&e),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Access(AccessError::NotFound) => not_found(),
            ApiError::Access(AccessError::Forbidden) => (StatusCode::FORBIDDEN, json!({ "error": "forbidden" })),
            ApiError::Access(AccessError::Challenge(forms)) | ApiError::Challenge { forms, captcha: None } => {
                (StatusCode::UNAUTHORIZED, json!({ "forms": forms }))
            }
            ApiError::Challenge {
                forms,
                captcha: Some(captcha),
            } => (StatusCode::UNAUTHORIZED, json!({ "forms": forms, "captcha": captcha })),
            ApiError::Access(AccessError::Token(e)) | ApiError::Token(e) => token_status(e),
            ApiError::Access(AccessError::Repository(e)) => internal(&e),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
        };
        (status, Json(body)).into_response()
    }
}

/// A form field given once or repeatedly.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
pub struct AttemptBody {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

#[derive(Debug, Deserialize)]
pub struct RenewBody {
    pub token: String,
}

/// Repeatable query parameters of an access attempt.
#[derive(Debug, Default)]
struct AccessQuery {
    intentions: Vec<String>,
    protections: Vec<String>,
    ids: Vec<String>,
    referrer: Option<String>,
    payload: Option<String>,
    token: Option<String>,
}

impl AccessQuery {
    fn parse(raw: Option<&str>) -> Self {
        let mut query = Self::default();
        let Some(raw) = raw else {
            return query;
        };
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "intention" => query.intentions.push(value),
                "protection" => query.protections.push(value),
                "id" => query.ids.push(value),
                "referrer" => query.referrer = Some(value),
                "payload" => query.payload = Some(value),
                "token" => query.token = Some(value),
                _ => {}
            }
        }
        query
    }

    fn content_ids(&self) -> Result<Vec<ContentId>, ApiError> {
        self.ids
            .iter()
            .map(|id| {
                Uuid::parse_str(id)
                    .map(ContentId)
                    .map_err(|_| ApiError::BadRequest(format!("invalid content id '{id}'")))
            })
            .collect()
    }
}

fn auth_request(headers: &HeaderMap, body: AttemptBody) -> Result<AuthRequest, ApiError> {
    let mut request = AuthRequest::new();

    if let Some(identity) = headers.get(IDENTITY_HEADER) {
        let identity = identity
            .to_str()
            .ok()
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| ApiError::BadRequest("invalid identity header".to_string()))?;
        request.identity = Some(UserId(identity));
    }
    request.client_ip = headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());

    for (name, value) in body.fields {
        let values = match value {
            FieldValue::One(value) => vec![value],
            FieldValue::Many(values) => values,
        };
        request.fields.insert(name, values);
    }
    Ok(request)
}

/// Build the attempt and attach the server-side session it names.
fn open_attempt(state: &AppState, headers: &HeaderMap, body: AttemptBody) -> Result<(String, AuthRequest), ApiError> {
    let mut request = auth_request(headers, body)?;
    let presented = headers.get(SESSION_HEADER).and_then(|value| value.to_str().ok());
    let (id, session) = state.services.sessions.open(presented);
    request.session = session;
    Ok((id, request))
}

fn with_session_id(id: &str, mut response: Response) -> Response {
    if let Ok(value) = HeaderValue::from_str(id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

fn save_session(state: &AppState, id: &str, session: SessionState, response: Response) -> Response {
    state.services.sessions.save(id, session);
    with_session_id(id, response)
}

/// Map an access result. A pending captcha gets a fresh answer drawn into
/// the session; any other outcome spends the current one.
fn settle<T>(
    sessions: &SessionStore,
    session: &mut SessionState,
    result: Result<T, AccessError>,
) -> Result<T, ApiError> {
    match result {
        Err(AccessError::Challenge(forms)) => {
            let captcha = forms
                .iter()
                .any(|form| form.code.as_str() == CAPTCHA_CODE)
                .then(|| sessions.issue_captcha(session));
            Err(ApiError::Challenge { forms, captcha })
        }
        other => {
            session.captcha_solution = None;
            other.map_err(ApiError::from)
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_component(
    State(state): State<Arc<AppState>>,
    Path((owner, name)): Path<(String, String)>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> Response {
    attempt(&state, &owner, &name, &headers, raw.as_deref(), AttemptBody::default()).await
}

async fn post_component(
    State(state): State<Arc<AppState>>,
    Path((owner, name)): Path<(String, String)>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
    Json(body): Json<AttemptBody>,
) -> Response {
    attempt(&state, &owner, &name, &headers, raw.as_deref(), body).await
}

async fn attempt(
    state: &AppState,
    owner: &str,
    name: &str,
    headers: &HeaderMap,
    raw_query: Option<&str>,
    body: AttemptBody,
) -> Response {
    let (session_id, mut request) = match open_attempt(state, headers, body) {
        Ok(opened) => opened,
        Err(e) => return e.into_response(),
    };
    let result = access(state, owner, name, raw_query, &mut request).await;
    save_session(state, &session_id, request.session, result.into_response())
}

/// Authorize (by protections or by a bearer token), then either list the
/// component or issue a token for the requested intentions.
async fn access(
    state: &AppState,
    owner: &str,
    name: &str,
    raw_query: Option<&str>,
    request: &mut AuthRequest,
) -> Result<Json<Value>, ApiError> {
    let query = AccessQuery::parse(raw_query);
    let intentions = IntentionSet::parse(query.intentions.iter().map(String::as_str))?;
    let selection = ProtectionSelection::from_query_values(query.protections.iter().map(String::as_str));
    let ids = query.content_ids()?;
    let services = &state.services;

    if let Some(token) = query.token.as_deref() {
        let grant = services
            .access
            .authorize_token(owner, name, request, &services.tokens, token, &intentions)
            .await?;
        return listing(state, &grant, &request.session).await;
    }

    let result = services.access.authorize(owner, name, request, &selection).await;
    let grant = settle(&services.sessions, &mut request.session, result)?;

    if intentions.is_empty() && query.referrer.is_none() {
        return listing(state, &grant, &request.session).await;
    }

    let issue = IssueRequest {
        content: None,
        referrer: query.referrer.clone(),
        intentions,
        strength: grant.strength,
        ids,
        payload: query.payload,
        session_key: request.session.key.clone(),
    };

    if issue.referrer.is_some() {
        let outcome = services.tokens.handshake(&grant.component, issue).await?;
        return Ok(Json(json!({
            "strength": grant.strength,
            "token": outcome.token.token,
            "hash": outcome.hash,
            "redirect": outcome.redirect.as_str(),
        })));
    }

    let token = services.tokens.issue(&grant.component, issue).await?;
    let expires = (!token.persist.is_persistent())
        .then(|| grant.component.token_expiry(token.created))
        .flatten();
    Ok(Json(json!({
        "strength": grant.strength,
        "token": token.token,
        "expires": expires,
    })))
}

/// Listed contents of a granted component; a token restricted to some
/// contents only lists those.
async fn listing(state: &AppState, grant: &AccessGrant, session: &SessionState) -> Result<Json<Value>, ApiError> {
    let restricted = grant
        .token
        .as_ref()
        .map(|token| token.extra.ids.as_slice())
        .filter(|ids| !ids.is_empty());
    let contents = state
        .services
        .access
        .list_visible_contents(&grant.component, session)
        .await?;
    let contents: Vec<Value> = contents
        .iter()
        .filter(|c| restricted.is_none_or(|ids| ids.contains(&c.id)))
        .map(|c| json!({ "id": c.id, "name": c.name, "type": c.content_type }))
        .collect();
    Ok(Json(json!({
        "component": grant.component.name,
        "strength": grant.strength,
        "contents": contents,
    })))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AttemptBody>,
) -> Response {
    let (session_id, request) = match open_attempt(&state, &headers, body) {
        Ok(opened) => opened,
        Err(e) => return e.into_response(),
    };
    let mut session = request.session.clone();
    let result = state.services.access.login(&owner, request).await;

    match settle(&state.services.sessions, &mut session, result) {
        Ok(outcome) => {
            let mut session = outcome.session;
            session.captcha_solution = None;
            let id = state.services.sessions.rotate(&session_id, session);
            let body = Json(json!({
                "user": outcome.user.id,
                "root": outcome.root.id,
                "strength": outcome.strength,
                "continue": outcome.continue_login,
                "session": id,
            }));
            with_session_id(&id, body.into_response())
        }
        Err(e) => save_session(&state, &session_id, session, e.into_response()),
    }
}

async fn renew_token(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RenewBody>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.services.tokens.renew(&body.token).await?;
    Ok(Json(json!({
        "token": outcome.token.token,
        "referrer_notified": outcome.referrer_notified,
    })))
}

async fn revoke_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.services.tokens.revoke_token(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}
