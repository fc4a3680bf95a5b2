// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Access Service
//!
//! Entry point of every authorization attempt: resolves the target
//! component, runs the engine, persists the audit side effects and maps the
//! decision onto [`AccessError`].
//!
//! Missing, soft-deleted, travel-hidden and foreign reserved components all
//! answer `NotFound`, as does a disguised failure. A caller can never tell
//! them apart from a component that does not exist.
//!
//! A session that went through a fake login stays on the decoy: the real
//! `index` and everything a fake-login overlay shields answer `NotFound`
//! and later logins are checked against `fake_index`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::token_manager::CapabilityTokenManager;
use crate::application::travel_service::TravelService;
use crate::domain::auth::{AuthRequest, ProtectionSelection, SessionState};
use crate::domain::authorization::{AuthDecision, AuthorizationEngine, Evaluation, EvaluationReport};
use crate::domain::component::{Component, FAKE_INDEX_NAME, INDEX_NAME};
use crate::domain::content::Content;
use crate::domain::events::AuthorizationEvent;
use crate::domain::protection::{AssignmentId, AuditEntry, ChallengeForm, ProtectionType};
use crate::domain::repository::{ComponentRepository, ContentRepository, RepositoryError, UserRepository};
use crate::domain::token::{CapabilityToken, IntentionSet, TokenError};
use crate::domain::travel::ShieldTarget;
use crate::domain::user::User;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::protections::password::PASSWORD_FIELD;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("not found")]
    NotFound,

    #[error("access denied")]
    Forbidden,

    #[error("further input required")]
    Challenge(Vec<ChallengeForm>),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Successful authorization.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub component: Component,
    pub strength: u8,
    /// Bearer token the grant came from; `None` when the protections passed.
    pub token: Option<CapabilityToken>,
}

/// Successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    /// Login gate the session continues from (the decoy on a fake login).
    pub root: Component,
    pub strength: u8,
    /// `false` once a travel overlay destroyed or locked the account's data.
    pub continue_login: bool,
    pub session: SessionState,
}

pub struct AccessService {
    engine: Arc<AuthorizationEngine>,
    components: Arc<dyn ComponentRepository>,
    contents: Arc<dyn ContentRepository>,
    users: Arc<dyn UserRepository>,
    travel: Arc<TravelService>,
    event_bus: Arc<EventBus>,
}

impl AccessService {
    pub fn new(
        engine: Arc<AuthorizationEngine>,
        components: Arc<dyn ComponentRepository>,
        contents: Arc<dyn ContentRepository>,
        users: Arc<dyn UserRepository>,
        travel: Arc<TravelService>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            engine,
            components,
            contents,
            users,
            travel,
            event_bus,
        }
    }

    async fn user(&self, username: &str) -> Result<User, AccessError> {
        match self.users.find_by_username(username).await? {
            Some(user) if user.is_active => Ok(user),
            _ => Err(AccessError::NotFound),
        }
    }

    /// Resolve a component the caller may address at all.
    async fn visible_component(
        &self,
        owner: &User,
        name: &str,
        request: &AuthRequest,
    ) -> Result<Component, AccessError> {
        let component = self
            .components
            .find_component(owner.id, name)
            .await?
            .ok_or(AccessError::NotFound)?;

        let is_owner = request.identity == Some(owner.id);
        if component.deletion_requested.is_some() || (component.is_reserved() && !is_owner) {
            return Err(AccessError::NotFound);
        }
        if request.session.is_fake && component.name == INDEX_NAME {
            return Err(AccessError::NotFound);
        }
        if self
            .travel
            .is_hidden(owner.id, &request.session, ShieldTarget::Component(component.id))
            .await
        {
            return Err(AccessError::NotFound);
        }
        Ok(component)
    }

    /// Authorize access to `owner/name`.
    pub async fn authorize(
        &self,
        owner: &str,
        name: &str,
        request: &AuthRequest,
        selection: &ProtectionSelection,
    ) -> Result<AccessGrant, AccessError> {
        let owner = self.user(owner).await?;
        let component = self.visible_component(&owner, name, request).await?;
        let report = self
            .evaluate(&component, request, ProtectionType::ACCESS_CONTROL, selection)
            .await?;

        match report.decision {
            AuthDecision::Granted { strength } => Ok(AccessGrant {
                component,
                strength,
                token: None,
            }),
            AuthDecision::Denied => Err(AccessError::Forbidden),
            AuthDecision::PendingForms { forms } => Err(AccessError::Challenge(forms)),
            AuthDecision::Disguised => Err(AccessError::NotFound),
        }
    }

    /// Authorize `owner/name` with a bearer capability token in place of the
    /// protection chain. The token must belong to the component and carry
    /// every requested intention; the grant has the strength it was issued
    /// with.
    pub async fn authorize_token(
        &self,
        owner: &str,
        name: &str,
        request: &AuthRequest,
        tokens: &CapabilityTokenManager,
        token: &str,
        intentions: &IntentionSet,
    ) -> Result<AccessGrant, AccessError> {
        let owner = self.user(owner).await?;
        let component = self.visible_component(&owner, name, request).await?;
        let record = tokens.validate_for(component.id, token, None).await?;
        if let Some(missing) = intentions.iter().find(|i| !record.has_intention(**i)) {
            return Err(TokenError::MissingIntention(*missing).into());
        }
        debug!(component_id = %component.id, token = %record.redacted(), "Granted by capability token");
        Ok(AccessGrant {
            component,
            strength: record.extra.strength,
            token: Some(record),
        })
    }

    /// Authenticate against the login gate of `username`, then run the
    /// travel policies of the owner.
    pub async fn login(&self, username: &str, request: AuthRequest) -> Result<LoginOutcome, AccessError> {
        let user = self.user(username).await?;
        let gate_name = if request.session.is_fake { FAKE_INDEX_NAME } else { INDEX_NAME };
        let gate = self
            .components
            .find_component(user.id, gate_name)
            .await?
            .ok_or(AccessError::NotFound)?;

        let report = self
            .evaluate(&gate, &request, ProtectionType::AUTHENTICATION, &ProtectionSelection::All)
            .await?;
        let strength = match report.decision {
            AuthDecision::Granted { strength } => strength,
            AuthDecision::Denied => return Err(AccessError::Forbidden),
            AuthDecision::PendingForms { forms } => return Err(AccessError::Challenge(forms)),
            AuthDecision::Disguised => return Err(AccessError::NotFound),
        };

        let mut session = request.session;
        for password in request.fields.get(PASSWORD_FIELD).into_iter().flatten() {
            session.password_hashes.insert(self.travel.trigger_hash(password));
        }

        let directive = self.travel.on_login(user.id, &session).await;
        session.is_travel_protected = session.is_travel_protected || !directive.triggered.is_empty();
        let switch_to_decoy = directive.fake_login && !session.is_fake;
        session.is_fake = session.is_fake || directive.fake_login;

        let root = if switch_to_decoy {
            self.components
                .find_component(user.id, FAKE_INDEX_NAME)
                .await?
                .ok_or(AccessError::NotFound)?
        } else {
            gate
        };

        self.event_bus.publish(AuthorizationEvent::LoginSucceeded {
            user_id: user.id,
            is_fake: session.is_fake,
            logged_in_at: Utc::now(),
        });
        info!(user_id = %user.id, continue_login = directive.continue_login, "Login succeeded");

        Ok(LoginOutcome {
            user,
            root,
            strength,
            continue_login: directive.continue_login,
            session,
        })
    }

    /// Components of `owner` the caller may see listed.
    ///
    /// The owner sees every component except travel-hidden ones (and, in a
    /// decoy session, the real `index`); anybody else only sees public,
    /// non-reserved ones.
    pub async fn list_visible_components(
        &self,
        owner: &str,
        request: &AuthRequest,
    ) -> Result<Vec<Component>, AccessError> {
        let owner = self.user(owner).await?;
        let is_owner = request.identity == Some(owner.id);
        let mut visible = Vec::new();
        for component in self.components.list_by_owner(owner.id).await? {
            if component.deletion_requested.is_some() {
                continue;
            }
            if !is_owner && (component.is_reserved() || !component.public) {
                continue;
            }
            if request.session.is_fake && component.name == INDEX_NAME {
                continue;
            }
            if self
                .travel
                .is_hidden(owner.id, &request.session, ShieldTarget::Component(component.id))
                .await
            {
                continue;
            }
            visible.push(component);
        }
        Ok(visible)
    }

    /// Listed contents of a component the caller already has access to.
    pub async fn list_visible_contents(
        &self,
        component: &Component,
        session: &SessionState,
    ) -> Result<Vec<Content>, AccessError> {
        let mut visible = Vec::new();
        for content in self.contents.list_by_component(component.id).await? {
            if !content.is_listed() || content.deletion_requested.is_some() {
                continue;
            }
            if self
                .travel
                .is_hidden(component.owner, session, ShieldTarget::Content(content.id))
                .await
            {
                continue;
            }
            visible.push(content);
        }
        Ok(visible)
    }

    async fn evaluate(
        &self,
        component: &Component,
        request: &AuthRequest,
        ptype: ProtectionType,
        selection: &ProtectionSelection,
    ) -> Result<EvaluationReport, AccessError> {
        let assignments = self.components.list_assigned_protections(component.id, ptype).await?;
        let report = self.engine.evaluate(
            request,
            Evaluation::new(component, &assignments, ptype).with_selection(selection),
        );
        debug!(
            component_id = %component.id,
            evaluated = ?report.evaluated,
            decision = report.decision.label(),
            "Evaluated protections"
        );

        self.persist_audit(&report.audit).await;
        metrics::counter!("spider_auth_decisions_total", "decision" => report.decision.label()).increment(1);
        self.event_bus.publish(AuthorizationEvent::Decided {
            component_id: component.id,
            decision: report.decision.label().to_string(),
            strength: report.decision.strength(),
            decided_at: Utc::now(),
        });
        Ok(report)
    }

    async fn persist_audit(&self, audit: &[(AssignmentId, AuditEntry)]) {
        let mut grouped: HashMap<AssignmentId, Vec<AuditEntry>> = HashMap::new();
        for (id, entry) in audit {
            grouped.entry(*id).or_default().push(entry.clone());
        }
        for (id, entries) in grouped {
            if let Err(e) = self.components.append_audit(id, &entries).await {
                warn!(assignment_id = %id, error = %e, "Failed to append audit entries");
            }
        }
    }
}
